mod local_cache;
mod postgres;

pub use local_cache::LocalDedupCache;
pub use postgres::PostgresDedupStore;

use std::{sync::Arc, time::Duration};

use alloy::primitives::{B256, keccak256};
use async_trait::async_trait;
use thiserror::Error;

use crate::metrics;

/// `keccak256("<tx hash hex, lowercase, no prefix>:<log index>")`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey(B256);

impl DedupKey {
    pub fn new(tx_hash: &B256, log_index: u64) -> Self {
        let raw = format!("{}:{log_index}", hex::encode(tx_hash));
        Self(keccak256(raw.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

#[derive(Debug, Error)]
pub enum DedupStoreError {
    #[error("dedup database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Dedup membership shared between listener instances.
#[async_trait]
pub trait SharedDedupStore: Send + Sync {
    async fn contains(&self, key: &DedupKey) -> Result<bool, DedupStoreError>;

    /// Atomic test-and-set. Returns `true` only if this call stored the key.
    /// Expired entries count as absent.
    async fn insert_if_absent(&self, key: &DedupKey, ttl: Duration)
    -> Result<bool, DedupStoreError>;

    /// Removes expired entries, returning how many were deleted.
    async fn purge_expired(&self) -> Result<u64, DedupStoreError>;
}

/// Admission filter keyed by `(tx hash, log index)`.
///
/// The shared store, when configured, is consulted first. Its failures are
/// logged and the local cache alone decides.
pub struct Deduplicator {
    local: LocalDedupCache,
    shared: Option<Arc<dyn SharedDedupStore>>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(local_capacity: usize) -> Self {
        Self {
            local: LocalDedupCache::new(local_capacity),
            shared: None,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_shared_store(mut self, store: Arc<dyn SharedDedupStore>, ttl: Duration) -> Self {
        self.shared = Some(store);
        self.ttl = ttl;
        self
    }

    pub fn shared_store(&self) -> Option<&Arc<dyn SharedDedupStore>> {
        self.shared.as_ref()
    }

    pub async fn is_duplicate(&self, tx_hash: &B256, log_index: u64) -> bool {
        let key = DedupKey::new(tx_hash, log_index);
        if self.local.contains(&key) {
            return true;
        }
        let Some(shared) = &self.shared else {
            return false;
        };
        match shared.contains(&key).await {
            Ok(found) => {
                if found {
                    self.local.insert(key);
                }
                found
            }
            Err(err) => {
                degraded("contains", &err);
                false
            }
        }
    }

    pub async fn mark_processed(&self, tx_hash: &B256, log_index: u64) {
        let key = DedupKey::new(tx_hash, log_index);
        self.local.insert(key);
        if let Some(shared) = &self.shared {
            if let Err(err) = shared.insert_if_absent(&key, self.ttl).await {
                degraded("mark", &err);
            }
        }
    }

    /// Returns `true` only if this call marked the event as processed.
    pub async fn check_and_mark(&self, tx_hash: &B256, log_index: u64) -> bool {
        let key = DedupKey::new(tx_hash, log_index);
        if self.local.contains(&key) {
            return false;
        }
        if let Some(shared) = &self.shared {
            match shared.insert_if_absent(&key, self.ttl).await {
                Ok(inserted) => {
                    self.local.insert(key);
                    return inserted;
                }
                Err(err) => degraded("check_and_mark", &err),
            }
        }
        self.local.insert(key)
    }
}

fn degraded(operation: &str, err: &DedupStoreError) {
    metrics::DEDUP_DEGRADED_TOTAL
        .with_label_values(&[operation])
        .inc();
    tracing::warn!(
        operation,
        err = %err,
        "shared dedup store unavailable, using local cache only"
    );
}
