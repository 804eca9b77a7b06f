mod file;
mod memory;
mod postgres;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;

use std::{collections::BTreeMap, sync::Arc};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::metrics;

/// Durable listener cursor. A checkpoint without `last_updated` was never saved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_block: u64,
    pub last_log_index: u64,
    pub last_tx_hash: Option<B256>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watched_addresses: Vec<Address>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn is_initialized(&self) -> bool {
        self.last_updated.is_some()
    }

    pub fn position(&self) -> (u64, u64) {
        (self.last_block, self.last_log_index)
    }

    /// First block the listener has not fully processed yet.
    pub fn resume_block(&self, start_block: u64) -> u64 {
        if self.is_initialized() {
            self.last_block.saturating_add(1)
        } else {
            start_block
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(
        "checkpoint cannot move backwards from ({current_block}, {current_log_index}) to ({new_block}, {new_log_index})"
    )]
    Regression {
        current_block: u64,
        current_log_index: u64,
        new_block: u64,
        new_log_index: u64,
    },
    #[error("checkpoint file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("checkpoint database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("invalid persisted checkpoint: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persisted checkpoint, or the zero value when nothing was saved yet.
    async fn load(&self) -> Result<Checkpoint, CheckpointError>;

    /// Replaces the persisted checkpoint atomically.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// Keeps the current checkpoint in memory and persists every change through
/// the store before exposing it.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    current: Mutex<Checkpoint>,
}

impl CheckpointManager {
    pub async fn load(store: Arc<dyn CheckpointStore>) -> Result<Self, CheckpointError> {
        let current = store.load().await?;
        if current.is_initialized() {
            metrics::LISTENER_CHECKPOINT_BLOCK.set(current.last_block as i64);
            tracing::info!(
                last_block = current.last_block,
                last_log_index = current.last_log_index,
                "loaded listener checkpoint"
            );
        } else {
            tracing::info!("no listener checkpoint persisted yet");
        }
        Ok(Self {
            store,
            current: Mutex::new(current),
        })
    }

    pub async fn current(&self) -> Checkpoint {
        self.current.lock().await.clone()
    }

    /// Moves the cursor forward to `(block_number, log_index)`.
    pub async fn advance(
        &self,
        block_number: u64,
        tx_hash: Option<B256>,
        log_index: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut current = self.current.lock().await;
        if current.is_initialized() && (block_number, log_index) < current.position() {
            return Err(CheckpointError::Regression {
                current_block: current.last_block,
                current_log_index: current.last_log_index,
                new_block: block_number,
                new_log_index: log_index,
            });
        }

        let next = Checkpoint {
            last_block: block_number,
            last_log_index: log_index,
            last_tx_hash: tx_hash.or(current.last_tx_hash),
            last_updated: Some(Utc::now()),
            watched_addresses: current.watched_addresses.clone(),
            metadata: current.metadata.clone(),
        };
        self.store.save(&next).await?;
        *current = next.clone();
        metrics::LISTENER_CHECKPOINT_BLOCK.set(block_number as i64);
        Ok(next)
    }

    /// Administrative reset: the next tick resumes from `block_number + 1`.
    pub async fn reset(&self, block_number: u64) -> Result<Checkpoint, CheckpointError> {
        let mut current = self.current.lock().await;
        let now = Utc::now();
        let mut metadata = current.metadata.clone();
        metadata.insert("reset_at".to_string(), serde_json::json!(now.to_rfc3339()));
        metadata.insert(
            "reset_from_block".to_string(),
            serde_json::json!(current.last_block),
        );

        let next = Checkpoint {
            last_block: block_number,
            last_log_index: 0,
            last_tx_hash: None,
            last_updated: Some(now),
            watched_addresses: current.watched_addresses.clone(),
            metadata,
        };
        self.store.save(&next).await?;
        tracing::warn!(
            from_block = current.last_block,
            to_block = block_number,
            "listener checkpoint reset"
        );
        *current = next.clone();
        metrics::LISTENER_CHECKPOINT_BLOCK.set(block_number as i64);
        Ok(next)
    }

    /// Records the addresses the listener watches. Only persisted once the
    /// checkpoint has been initialized.
    pub async fn set_watched_addresses(
        &self,
        addresses: Vec<Address>,
    ) -> Result<(), CheckpointError> {
        let mut current = self.current.lock().await;
        if current.watched_addresses == addresses {
            return Ok(());
        }
        let mut next = current.clone();
        next.watched_addresses = addresses;
        if next.is_initialized() {
            self.store.save(&next).await?;
        }
        *current = next;
        Ok(())
    }
}
