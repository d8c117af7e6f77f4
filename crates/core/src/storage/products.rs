use crate::types::ProductDigest;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Digest and size of a product after it was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub digest: ProductDigest,
    pub bytes: u64,
}

/// Filesystem layout of a pipeline's products
///
/// ```text
/// <base>/input_data.csv
/// <base>/<stream>.csv
/// <base>/<stream>_cleaned.csv
/// <base>/<stream>_area.csv
/// <base>/total.txt
/// <base>/runs/<run_id>.jsonl.gz
/// ```
#[derive(Debug, Clone)]
pub struct ProductStore {
    base_path: PathBuf,
}

impl ProductStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the products directory
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path)
            .with_context(|| format!("Failed to create {}", self.base_path.display()))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn input_data(&self) -> PathBuf {
        self.base_path.join("input_data.csv")
    }

    pub fn stream(&self, stream: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", stream))
    }

    pub fn cleaned(&self, stream: &str) -> PathBuf {
        self.base_path.join(format!("{}_cleaned.csv", stream))
    }

    pub fn area(&self, stream: &str) -> PathBuf {
        self.base_path.join(format!("{}_area.csv", stream))
    }

    pub fn total(&self) -> PathBuf {
        self.base_path.join("total.txt")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_path.join("runs")
    }

    /// Make sure the directory a product will be written into exists
    pub async fn prepare(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create product directory")?;
            }
        }
        Ok(())
    }

    /// Hash a written product
    pub async fn record(path: &Path) -> Result<ProductRecord> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read product {}", path.display()))?;
        Ok(ProductRecord {
            digest: ProductDigest::from_bytes(&data),
            bytes: data.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let store = ProductStore::new("products/multi");
        assert_eq!(store.input_data(), PathBuf::from("products/multi/input_data.csv"));
        assert_eq!(
            store.cleaned("stream-001"),
            PathBuf::from("products/multi/stream-001_cleaned.csv")
        );
        assert_eq!(store.total(), PathBuf::from("products/multi/total.txt"));
    }

    #[tokio::test]
    async fn test_prepare_and_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("total.txt");

        ProductStore::prepare(&path).await.unwrap();
        tokio::fs::write(&path, b"1.000").await.unwrap();

        let record = ProductStore::record(&path).await.unwrap();
        assert_eq!(record.bytes, 5);
        assert_eq!(record.digest, ProductDigest::from_bytes(b"1.000"));
    }
}
