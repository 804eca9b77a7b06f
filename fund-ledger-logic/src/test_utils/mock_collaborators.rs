use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use alloy::primitives::{Address, B256, U256, keccak256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::vault_log;
use crate::{
    approval::{
        ApprovalTicket, ExecutionGateway, ExecutionOutcome, ExecutionRequest, NotificationSink,
        TicketStatus,
    },
    clock::Clock,
    dedup::{DedupKey, DedupStoreError, SharedDedupStore},
    dispatcher::EventHandler,
    events::{EventCatalog, ParsedEvent, abi::IFundVault},
};

/// Tx hash shared by all synthetic logs of a block.
pub fn block_tx_hash(block_number: u64) -> B256 {
    keccak256(block_number.to_be_bytes())
}

/// Decoded `Transfer` event at the given position.
pub fn parsed_transfer(block_number: u64, log_index: u64) -> ParsedEvent {
    let event = IFundVault::Transfer {
        from: Address::repeat_byte(0x01),
        to: Address::repeat_byte(0x02),
        value: U256::from(1_000u64 + log_index),
    };
    let log = vault_log(
        &event,
        Address::repeat_byte(0xaa),
        block_number,
        log_index,
        block_tx_hash(block_number),
    );
    EventCatalog::new()
        .decode(&log)
        .expect("transfer log should decode")
}

/// Handler that records what it saw and can be told to misbehave.
pub struct RecordingHandler {
    name: String,
    positions: Mutex<Vec<(u64, u64)>>,
    journal: Mutex<Option<Arc<Mutex<Vec<String>>>>>,
    fail: AtomicBool,
    panic: AtomicBool,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            positions: Mutex::new(Vec::new()),
            journal: Mutex::new(None),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Appends the handler name to `journal` on every call.
    pub fn with_journal(self: Arc<Self>, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        *self.journal.lock() = Some(journal);
        self
    }

    pub fn failing(self: Arc<Self>) -> Arc<Self> {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking(self: Arc<Self>) -> Arc<Self> {
        self.panic.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn count(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn positions(&self) -> Vec<(u64, u64)> {
        self.positions.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &ParsedEvent) -> anyhow::Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.positions.lock().push(event.position());
        let journal = self.journal.lock().clone();
        if let Some(journal) = journal {
            journal.lock().push(self.name.clone());
        }

        if self.panic.load(Ordering::SeqCst) {
            panic!("handler {} panicked", self.name);
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("handler {} failed", self.name);
        }
        Ok(())
    }
}

/// Shared dedup store with in-process TTL bookkeeping.
#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: Mutex<HashMap<DedupKey, Instant>>,
    unavailable: AtomicBool,
}

impl InMemoryDedupStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn check_available(&self) -> Result<(), DedupStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DedupStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedDedupStore for InMemoryDedupStore {
    async fn contains(&self, key: &DedupKey) -> Result<bool, DedupStoreError> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn insert_if_absent(
        &self,
        key: &DedupKey,
        ttl: Duration,
    ) -> Result<bool, DedupStoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|expires_at| *expires_at > now) {
            return Ok(false);
        }
        entries.insert(*key, now + ttl);
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<u64, DedupStoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Default)]
pub struct RecordingExecutionGateway {
    requests: Mutex<Vec<ExecutionRequest>>,
    fail: AtomicBool,
}

impl RecordingExecutionGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ExecutionGateway for RecordingExecutionGateway {
    async fn execute(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionOutcome> {
        self.requests.lock().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("settlement service unavailable");
        }
        Ok(ExecutionOutcome::succeeded(Some(format!(
            "exec-{}",
            request.ticket_id
        ))))
    }
}

#[derive(Default)]
pub struct RecordingNotificationSink {
    escalated: Mutex<Vec<Uuid>>,
    resolved: Mutex<Vec<(Uuid, TicketStatus)>>,
    fail: AtomicBool,
}

impl RecordingNotificationSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn escalated(&self) -> Vec<Uuid> {
        self.escalated.lock().clone()
    }

    pub fn resolved(&self) -> Vec<(Uuid, TicketStatus)> {
        self.resolved.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn tickets_escalated(&self, tickets: &[ApprovalTicket]) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notification channel down");
        }
        self.escalated
            .lock()
            .extend(tickets.iter().map(|ticket| ticket.id));
        Ok(())
    }

    async fn ticket_resolved(&self, ticket: &ApprovalTicket) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notification channel down");
        }
        self.resolved.lock().push((ticket.id, ticket.status));
        Ok(())
    }
}
