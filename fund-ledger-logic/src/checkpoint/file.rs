use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Checkpoint, CheckpointError, CheckpointStore};

/// JSON document on local disk. Saves write a sibling temp file and rename it
/// over the target, so readers never observe a partial document.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Checkpoint, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_file_loads_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.load().await.unwrap(), Checkpoint::default());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested/checkpoint.json"));

        let mut checkpoint = Checkpoint {
            last_block: 1_234,
            last_log_index: 5,
            last_tx_hash: Some(B256::repeat_byte(0xab)),
            last_updated: Some(Utc::now()),
            watched_addresses: vec![Address::repeat_byte(0xaa)],
            ..Default::default()
        };
        checkpoint
            .metadata
            .insert("source".to_string(), serde_json::json!("test"));

        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), checkpoint);
        assert!(!store.temp_path().exists());

        checkpoint.last_block = 1_300;
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap().last_block, 1_300);
    }

    #[tokio::test]
    async fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = FileCheckpointStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization(_)));
    }
}
