use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Checkpoint, CheckpointError, CheckpointStore};

/// Process-local store, used by tests and single-shot tooling.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoint: Mutex<Option<Checkpoint>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryCheckpointStore {
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Release);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<Checkpoint, CheckpointError> {
        Ok(self.checkpoint.lock().clone().unwrap_or_default())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if self.fail_saves.load(Ordering::Acquire) {
            return Err(CheckpointError::Io(std::io::Error::other(
                "checkpoint store unavailable",
            )));
        }
        *self.checkpoint.lock() = Some(checkpoint.clone());
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
