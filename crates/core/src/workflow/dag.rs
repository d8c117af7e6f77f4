use crate::types::{PipelineSpec, TaskId, TaskSpec};
use anyhow::{anyhow, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, Topo};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// DAG representation of a pipeline
pub struct PipelineDag {
    graph: DiGraph<TaskSpec, ()>,
    task_indices: HashMap<TaskId, NodeIndex>,
}

impl PipelineDag {
    /// Build a DAG from a pipeline specification
    pub fn from_pipeline(pipeline: &PipelineSpec) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut task_indices = HashMap::new();

        // Add all tasks as nodes
        for task in &pipeline.tasks {
            if task_indices.contains_key(&task.id) {
                return Err(anyhow!("Task {} is defined more than once", task.id));
            }
            let node = graph.add_node(task.clone());
            task_indices.insert(task.id.clone(), node);
        }

        // Add dependency edges
        for (task_id, dependencies) in &pipeline.dependencies {
            let task_idx = task_indices.get(task_id).ok_or_else(|| {
                anyhow!("Task {} referenced in dependencies but not defined", task_id)
            })?;

            for dep_id in dependencies {
                let dep_idx = task_indices
                    .get(dep_id)
                    .ok_or_else(|| anyhow!("Dependency {} not found for task {}", dep_id, task_id))?;

                // Edge from dependency to dependent (dep -> task)
                graph.update_edge(*dep_idx, *task_idx, ());
            }
        }

        // Verify the graph is acyclic
        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(anyhow!("Pipeline contains circular dependencies"));
        }

        Ok(Self {
            graph,
            task_indices,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&TaskSpec> {
        self.task_indices.get(task_id).map(|&n| &self.graph[n])
    }

    /// Get tasks in topological order (dependencies first)
    pub fn topological_order(&self) -> Vec<TaskSpec> {
        let mut topo = Topo::new(&self.graph);
        let mut tasks = Vec::new();

        while let Some(node) = topo.next(&self.graph) {
            tasks.push(self.graph[node].clone());
        }

        tasks
    }

    /// Get dependencies for a task, sorted by id
    pub fn dependencies(&self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        self.neighbors(task_id, petgraph::Direction::Incoming)
    }

    /// Get tasks that depend on the given task, sorted by id
    pub fn dependents(&self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        self.neighbors(task_id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, task_id: &TaskId, direction: petgraph::Direction) -> Result<Vec<TaskId>> {
        let node = self
            .task_indices
            .get(task_id)
            .ok_or_else(|| anyhow!("Task {} not found", task_id))?;

        let mut ids: Vec<TaskId> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.graph[n].id.clone())
            .collect();
        ids.sort();

        Ok(ids)
    }

    /// Check if all dependencies of a task are satisfied
    pub fn can_execute(&self, task_id: &TaskId, completed_tasks: &HashSet<TaskId>) -> Result<bool> {
        let deps = self.dependencies(task_id)?;
        Ok(deps.iter().all(|dep| completed_tasks.contains(dep)))
    }

    /// Get all tasks with no dependencies (can start immediately)
    pub fn entry_tasks(&self) -> Vec<TaskSpec> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Mermaid flowchart of the pipeline, left to right
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph LR\n");

        // Mermaid ids can't contain '-', so nodes get positional ids and a label
        let order = self.topological_order();
        let ids: HashMap<&TaskId, String> = order
            .iter()
            .enumerate()
            .map(|(i, task)| (&task.id, format!("n{}", i)))
            .collect();

        for task in &order {
            let _ = writeln!(
                out,
                "    {}[\"{}<br/><i>{}</i>\"]",
                ids[&task.id],
                task.name,
                task.action.kind()
            );
        }

        let mut edges: Vec<(&String, &String)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    &ids[&self.graph[e.source()].id],
                    &ids[&self.graph[e.target()].id],
                )
            })
            .collect();
        edges.sort();

        for (from, to) in edges {
            let _ = writeln!(out, "    {} --> {}", from, to);
        }

        out
    }

    /// Standalone HTML page rendering [`Self::to_mermaid`]
    pub fn to_mermaid_html(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Pipeline</title>
<script src="https://cdn.jsdelivr.net/npm/mermaid/dist/mermaid.min.js"></script>
<script>mermaid.initialize({{ startOnLoad: true }});</script>
</head>
<body>
<div class="mermaid">
{}</div>
</body>
</html>
"#,
            self.to_mermaid()
        )
    }
}
