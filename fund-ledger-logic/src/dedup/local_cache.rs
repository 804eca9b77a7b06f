use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use super::DedupKey;

/// Insertion-ordered bounded set; the oldest key is evicted first.
pub struct LocalDedupCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

impl LocalDedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.inner.lock().keys.contains(key)
    }

    /// Returns `true` if the key was not present and has been inserted.
    pub fn insert(&self, key: DedupKey) -> bool {
        let mut inner = self.inner.lock();
        if !inner.keys.insert(key) {
            return false;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.keys.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
