use crate::events::{Event, EventLog};
use crate::types::RunId;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Event log implementation using gzip-compressed JSONL (JSON Lines), one file per run
pub struct JsonlEventLog {
    base_path: PathBuf,
    // Events not yet written to disk, keyed by run
    buffer: RwLock<HashMap<RunId, Vec<Event>>>,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffer: RwLock::new(HashMap::new()),
        })
    }

    /// Path to the event log file for a run
    /// Format: <base>/<run_id>.jsonl.gz
    pub fn event_log_path(&self, run_id: &RunId) -> PathBuf {
        self.base_path.join(format!("{}.jsonl.gz", run_id))
    }

    /// Read JSONL.GZ file
    fn read_jsonl_gz(path: &Path) -> Result<Vec<Event>> {
        use flate2::read::GzDecoder;
        use std::io::BufRead;

        let file = std::fs::File::open(path).context("Failed to open event log")?;
        let decoder = GzDecoder::new(file);
        let reader = std::io::BufReader::new(decoder);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.context("Failed to read line from event log")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
            events.push(event);
        }

        Ok(events)
    }

    /// Write JSONL.GZ file
    async fn write_jsonl_gz(path: &Path, events: &[Event]) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

        for event in events {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            encoder
                .write_all(json.as_bytes())
                .context("Failed to write event")?;
            encoder.write_all(b"\n").context("Failed to write newline")?;
        }

        let compressed = encoder.finish().context("Failed to finish compression")?;

        tokio::fs::write(path, compressed)
            .await
            .context("Failed to write event log file")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let run_id = event.run_id;
        let mut buffer = self.buffer.write().await;
        let pending = buffer.entry(run_id).or_default();
        pending.push(event);

        // Flush buffer if it gets large (e.g., > 100 events)
        if pending.len() > 100 {
            drop(buffer);
            self.flush(&run_id).await?;
        }

        Ok(())
    }

    async fn flush(&self, run_id: &RunId) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        let Some(pending) = buffer.remove(run_id) else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }

        let path = self.event_log_path(run_id);

        // gzip members can't be appended in place, so rewrite the whole file
        let mut all_events = if path.exists() {
            Self::read_jsonl_gz(&path)?
        } else {
            Vec::new()
        };
        all_events.extend(pending);

        Self::write_jsonl_gz(&path, &all_events).await?;
        tracing::debug!(
            "Flushed {} events for run {} to {}",
            all_events.len(),
            run_id,
            path.display()
        );

        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        // Flush any buffered events first
        self.flush(&run_id).await?;

        let path = self.event_log_path(&run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut events = Self::read_jsonl_gz(&path)?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

/// In-memory event log, used when no products directory should be touched
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn flush(&self, _run_id: &RunId) -> Result<()> {
        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::types::TaskId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_event_log() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let run_id = RunId::new();
        let event = Event::new(
            run_id,
            EventType::TaskStarted {
                task_id: TaskId::new("make-data"),
            },
        );

        log.append(event.clone()).await.unwrap();
        log.flush(&run_id).await.unwrap();

        assert!(log.event_log_path(&run_id).exists());

        let events = log.get_run_events(run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
    }

    #[tokio::test]
    async fn test_flush_appends_to_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();
        let run_id = RunId::new();

        for name in ["make-data", "totaliser"] {
            log.append(Event::new(
                run_id,
                EventType::TaskStarted {
                    task_id: TaskId::new(name),
                },
            ))
            .await
            .unwrap();
            log.flush(&run_id).await.unwrap();
        }

        // A fresh reader sees both flushes
        let reopened = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();
        let events = reopened.get_run_events(run_id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_runs_are_kept_apart() {
        let log = MemoryEventLog::new();
        let first = RunId::new();
        let second = RunId::new();

        log.append(Event::new(first, EventType::RunCancelled { reason: "a".into() }))
            .await
            .unwrap();
        log.append(Event::new(second, EventType::RunCancelled { reason: "b".into() }))
            .await
            .unwrap();

        assert_eq!(log.get_run_events(first).await.unwrap().len(), 1);
        assert_eq!(log.get_run_events(second).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run_has_no_events() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();
        assert!(log.get_run_events(RunId::new()).await.unwrap().is_empty());
    }
}
