use std::{collections::HashSet, sync::Arc, time::Duration};

use alloy::primitives::Address;
use anyhow::Context;
use futures::future;
use itertools::Itertools;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    chain_reader::ChainReader,
    checkpoint::CheckpointManager,
    dedup::Deduplicator,
    dispatcher::{BatchOutcome, EventDispatcher},
    events::{EventCatalog, ParsedEvent},
    metrics,
    settings::ListenerSettings,
};

#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub addresses: Vec<Address>,
    pub start_block: u64,
    pub batch_size: u64,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Dispatch different contracts' events concurrently with this bound.
    /// Events of one contract always run in order. Sequential when unset.
    pub max_parallel_dispatch: Option<usize>,
}

impl From<&ListenerSettings> for ListenerConfig {
    fn from(settings: &ListenerSettings) -> Self {
        Self {
            addresses: settings.watched_addresses(),
            start_block: settings.start_block,
            batch_size: settings.batch_size,
            confirmations: settings.confirmations,
            poll_interval: settings.poll_interval,
            error_backoff: settings.error_backoff,
            max_parallel_dispatch: settings.max_parallel_dispatch,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Confirmed head at the time of the tick.
    pub head: u64,
    pub fetched: usize,
    pub decoded: usize,
    pub duplicates: usize,
    pub dispatch: BatchOutcome,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing new below the confirmed head.
    Idle { head: u64 },
    Processed(BatchReport),
}

/// Poll loop: fetch, decode, dedup, dispatch, checkpoint.
pub struct EventListener {
    reader: Arc<ChainReader>,
    catalog: EventCatalog,
    dedup: Arc<Deduplicator>,
    dispatcher: Arc<EventDispatcher>,
    checkpoints: Arc<CheckpointManager>,
    config: ListenerConfig,
}

impl EventListener {
    pub fn new(
        reader: Arc<ChainReader>,
        dedup: Arc<Deduplicator>,
        dispatcher: Arc<EventDispatcher>,
        checkpoints: Arc<CheckpointManager>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            reader,
            catalog: EventCatalog::new(),
            dedup,
            dispatcher,
            checkpoints,
            config,
        }
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Runs until `shutdown` is cancelled. Cancellation is observed between
    /// ticks, so an in-flight batch is always dispatched and checkpointed.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.checkpoints
            .set_watched_addresses(self.config.addresses.clone())
            .await
            .context("failed to record watched addresses")?;
        tracing::info!(
            addresses = ?self.config.addresses,
            start_block = self.config.start_block,
            batch_size = self.config.batch_size,
            confirmations = self.config.confirmations,
            "starting event listener"
        );

        while !shutdown.is_cancelled() {
            let wait = match self.tick().await {
                Ok(TickOutcome::Processed(report)) if report.to_block < report.head => {
                    Duration::ZERO
                }
                Ok(_) => self.config.poll_interval,
                Err(err) => {
                    tracing::error!(err = ?err, "listener tick failed, retrying the same range");
                    self.config.error_backoff
                }
            };

            if !wait.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        tracing::info!("event listener stopped");
        Ok(())
    }

    /// Processes at most one block range.
    #[instrument(skip_all, level = "debug")]
    pub async fn tick(&self) -> anyhow::Result<TickOutcome> {
        let checkpoint = self.checkpoints.current().await;
        let from_block = checkpoint.resume_block(self.config.start_block);
        let latest = self
            .reader
            .latest_block_number()
            .await
            .context("failed to fetch latest block number")?;
        let head = latest.saturating_sub(self.config.confirmations);
        if from_block > head {
            tracing::debug!(from_block, head, "no confirmed blocks to process");
            return Ok(TickOutcome::Idle { head });
        }
        let to_block = head.min(from_block.saturating_add(self.config.batch_size.max(1) - 1));

        let logs = self
            .reader
            .get_logs(from_block, to_block, &self.config.addresses, &self.catalog.topics())
            .await
            .with_context(|| format!("failed to fetch logs for blocks {from_block}..={to_block}"))?;
        let events = self.catalog.decode_batch(&logs);

        let mut admitted = Vec::with_capacity(events.len());
        let mut seen = HashSet::with_capacity(events.len());
        for event in &events {
            if !seen.insert((event.tx_hash, event.log_index))
                || self.dedup.is_duplicate(&event.tx_hash, event.log_index).await
            {
                tracing::debug!(
                    tx_hash = %event.tx_hash,
                    log_index = event.log_index,
                    "skipping already processed event"
                );
            } else {
                admitted.push(event.clone());
            }
        }
        let duplicates = events.len() - admitted.len();

        let dispatch = self.dispatch(&admitted).await;

        // The stored log index belongs to `to_block`; 0 when that block had no events.
        let last = events.last();
        self.checkpoints
            .advance(
                to_block,
                last.map(|event| event.tx_hash),
                last.filter(|event| event.block_number == to_block)
                    .map(|event| event.log_index)
                    .unwrap_or_default(),
            )
            .await
            .context("failed to advance checkpoint")?;

        metrics::LISTENER_EVENTS_TOTAL
            .with_label_values(&["fetched"])
            .inc_by(logs.len() as u64);
        metrics::LISTENER_EVENTS_TOTAL
            .with_label_values(&["decoded"])
            .inc_by(events.len() as u64);
        metrics::LISTENER_EVENTS_TOTAL
            .with_label_values(&["duplicate"])
            .inc_by(duplicates as u64);
        metrics::LISTENER_EVENTS_TOTAL
            .with_label_values(&["admitted"])
            .inc_by(admitted.len() as u64);

        tracing::info!(
            from_block,
            to_block,
            head,
            fetched = logs.len(),
            decoded = events.len(),
            duplicates,
            handled = dispatch.handled_count,
            handler_failures = dispatch.failures.len(),
            "processed block range"
        );

        Ok(TickOutcome::Processed(BatchReport {
            from_block,
            to_block,
            head,
            fetched: logs.len(),
            decoded: events.len(),
            duplicates,
            dispatch,
        }))
    }

    /// Each event is marked processed only after its dispatch completed.
    async fn dispatch(&self, events: &[ParsedEvent]) -> BatchOutcome {
        match self.config.max_parallel_dispatch {
            Some(max_concurrent) if max_concurrent > 1 => {
                let semaphore = Semaphore::new(max_concurrent);
                let groups = events
                    .iter()
                    .into_group_map_by(|event| event.contract_address);
                let outcomes = future::join_all(groups.into_values().map(|group| {
                    let semaphore = &semaphore;
                    async move {
                        let _permit = semaphore.acquire().await.ok();
                        self.dispatch_in_order(group).await
                    }
                }))
                .await;

                let mut batch = BatchOutcome::default();
                for outcome in outcomes {
                    batch.merge(outcome);
                }
                batch
            }
            _ => self.dispatch_in_order(events).await,
        }
    }

    async fn dispatch_in_order<'a>(
        &self,
        events: impl IntoIterator<Item = &'a ParsedEvent>,
    ) -> BatchOutcome {
        let mut batch = BatchOutcome::default();
        for event in events {
            let outcome = self.dispatcher.dispatch(event).await;
            self.dedup
                .mark_processed(&event.tx_hash, event.log_index)
                .await;
            batch.record(outcome);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain_reader::ReaderConfig,
        checkpoint::InMemoryCheckpointStore,
        events::{EventKind, abi::IFundVault},
        test_utils::{
            InMemoryDedupStore, MockRpcEndpoint, RecordingHandler, block_tx_hash,
            reader_with_mocks, vault_log,
        },
    };
    use alloy::{
        primitives::{B256, Bytes, LogData, U256},
        rpc::types::Log,
    };
    use pretty_assertions::assert_eq;

    fn vault() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn transfer_log(block_number: u64, log_index: u64) -> Log {
        let event = IFundVault::Transfer {
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value: U256::from(10u64),
        };
        vault_log(
            &event,
            vault(),
            block_number,
            log_index,
            block_tx_hash(block_number),
        )
    }

    fn config() -> ListenerConfig {
        ListenerConfig {
            addresses: vec![vault()],
            start_block: 1,
            batch_size: 10,
            confirmations: 2,
            poll_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            max_parallel_dispatch: None,
        }
    }

    struct Fixture {
        mock: MockRpcEndpoint,
        checkpoint_store: Arc<InMemoryCheckpointStore>,
        dedup_store: Arc<InMemoryDedupStore>,
    }

    impl Fixture {
        fn new(head: u64) -> Self {
            Self {
                mock: MockRpcEndpoint::new(head),
                checkpoint_store: Arc::new(InMemoryCheckpointStore::default()),
                dedup_store: Arc::new(InMemoryDedupStore::default()),
            }
        }

        /// A fresh listener process over the same chain and stores.
        async fn listener(&self, config: ListenerConfig) -> (EventListener, Arc<RecordingHandler>) {
            let reader = reader_with_mocks(
                vec![self.mock.clone()],
                ReaderConfig {
                    max_retries: 1,
                    retry_delay: Duration::from_millis(1),
                    request_timeout: Duration::from_millis(200),
                },
            );
            let dedup = Deduplicator::new(1_000)
                .with_shared_store(self.dedup_store.clone(), Duration::from_secs(3_600));
            let dispatcher = EventDispatcher::new();
            let handler = RecordingHandler::new("transfers");
            dispatcher.register_handler(EventKind::Transfer, handler.clone(), 0);
            let checkpoints = CheckpointManager::load(self.checkpoint_store.clone())
                .await
                .unwrap();

            let listener = EventListener::new(
                Arc::new(reader),
                Arc::new(dedup),
                Arc::new(dispatcher),
                Arc::new(checkpoints),
                config,
            );
            (listener, handler)
        }
    }

    fn processed(outcome: TickOutcome) -> BatchReport {
        match outcome {
            TickOutcome::Processed(report) => report,
            TickOutcome::Idle { head } => panic!("expected a processed batch, idle at {head}"),
        }
    }

    #[tokio::test]
    async fn processes_confirmed_ranges_in_batches() {
        let fixture = Fixture::new(20);
        fixture.mock.push_logs([
            transfer_log(9, 0),
            transfer_log(3, 1),
            transfer_log(3, 0),
            transfer_log(15, 0),
            transfer_log(19, 0),
        ]);
        let (listener, handler) = fixture.listener(config()).await;

        let report = processed(listener.tick().await.unwrap());
        assert_eq!((report.from_block, report.to_block, report.head), (1, 10, 18));
        assert_eq!((report.fetched, report.decoded, report.duplicates), (3, 3, 0));
        assert_eq!(report.dispatch.handled_count, 3);
        assert_eq!(handler.positions(), vec![(3, 0), (3, 1), (9, 0)]);

        let checkpoint = listener.checkpoints().current().await;
        assert_eq!(checkpoint.position(), (10, 0));
        assert_eq!(checkpoint.last_tx_hash, Some(block_tx_hash(9)));

        let report = processed(listener.tick().await.unwrap());
        assert_eq!((report.from_block, report.to_block), (11, 18));
        assert_eq!(handler.positions(), vec![(3, 0), (3, 1), (9, 0), (15, 0)]);

        assert!(matches!(
            listener.tick().await.unwrap(),
            TickOutcome::Idle { head: 18 }
        ));
        assert_eq!(fixture.checkpoint_store.saves(), 2);
    }

    #[tokio::test]
    async fn stays_idle_below_confirmed_head() {
        let fixture = Fixture::new(5);
        let mut config = config();
        config.start_block = 10;
        let (listener, handler) = fixture.listener(config).await;

        assert!(matches!(
            listener.tick().await.unwrap(),
            TickOutcome::Idle { head: 3 }
        ));
        assert_eq!(fixture.mock.calls("eth_getLogs"), 0);
        assert_eq!(handler.count(), 0);
        assert!(!listener.checkpoints().current().await.is_initialized());
    }

    #[tokio::test]
    async fn rpc_failure_keeps_checkpoint() {
        let fixture = Fixture::new(20);
        fixture.mock.push_logs([transfer_log(3, 0)]);
        let (listener, handler) = fixture.listener(config()).await;
        fixture.mock.set_should_fail(true);

        assert!(listener.tick().await.is_err());
        assert_eq!(handler.count(), 0);
        assert!(!listener.checkpoints().current().await.is_initialized());
        assert_eq!(fixture.checkpoint_store.saves(), 0);

        fixture.mock.set_should_fail(false);
        let report = processed(listener.tick().await.unwrap());
        assert_eq!(report.from_block, 1);
        assert_eq!(handler.count(), 1);
    }

    #[tokio::test]
    async fn undecodable_logs_are_dropped() {
        let fixture = Fixture::new(20);
        let mut unknown = transfer_log(4, 0);
        unknown.inner.data = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Bytes::new());
        fixture.mock.push_logs([unknown, transfer_log(4, 1)]);
        let (listener, handler) = fixture.listener(config()).await;

        let report = processed(listener.tick().await.unwrap());
        assert_eq!((report.fetched, report.decoded), (2, 1));
        assert_eq!(handler.positions(), vec![(4, 1)]);
        assert_eq!(listener.checkpoints().current().await.position(), (10, 0));
    }

    #[tokio::test]
    async fn checkpoint_log_index_belongs_to_last_block() {
        let fixture = Fixture::new(20);
        fixture
            .mock
            .push_logs([transfer_log(9, 0), transfer_log(10, 2)]);
        let (listener, _handler) = fixture.listener(config()).await;

        processed(listener.tick().await.unwrap());
        let checkpoint = listener.checkpoints().current().await;
        assert_eq!(checkpoint.position(), (10, 2));
        assert_eq!(checkpoint.last_tx_hash, Some(block_tx_hash(10)));
    }

    #[tokio::test]
    async fn repeated_log_in_one_batch_is_dispatched_once() {
        let fixture = Fixture::new(20);
        fixture
            .mock
            .push_logs([transfer_log(3, 0), transfer_log(3, 0), transfer_log(4, 0)]);
        let (listener, handler) = fixture.listener(config()).await;

        let report = processed(listener.tick().await.unwrap());
        assert_eq!((report.decoded, report.duplicates), (3, 1));
        assert_eq!(report.dispatch.handled_count, 2);
        assert_eq!(handler.positions(), vec![(3, 0), (4, 0)]);
        assert_eq!(fixture.dedup_store.len(), 2);
    }

    #[tokio::test]
    async fn replay_after_reset_skips_processed_events() {
        let fixture = Fixture::new(20);
        fixture
            .mock
            .push_logs([transfer_log(3, 0), transfer_log(5, 0)]);
        let (listener, handler) = fixture.listener(config()).await;
        processed(listener.tick().await.unwrap());
        assert_eq!(handler.count(), 2);

        listener.checkpoints().reset(2).await.unwrap();
        let report = processed(listener.tick().await.unwrap());
        assert_eq!(report.from_block, 3);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.dispatch.handled_count, 0);
        assert_eq!(handler.count(), 2);
    }

    #[tokio::test]
    async fn restart_after_failed_checkpoint_neither_replays_nor_skips() {
        let fixture = Fixture::new(30);
        fixture.mock.push_logs([
            transfer_log(3, 0),
            transfer_log(3, 1),
            transfer_log(8, 0),
            transfer_log(12, 0),
        ]);

        let (crashed, first_handler) = fixture.listener(config()).await;
        fixture.checkpoint_store.set_fail_saves(true);
        assert!(crashed.tick().await.is_err());
        assert_eq!(first_handler.count(), 3);
        drop(crashed);

        fixture.checkpoint_store.set_fail_saves(false);
        let (restarted, second_handler) = fixture.listener(config()).await;
        let report = processed(restarted.tick().await.unwrap());
        assert_eq!(report.from_block, 1);
        assert_eq!(report.duplicates, 3);
        assert_eq!(second_handler.count(), 0);
        assert_eq!(restarted.checkpoints().current().await.last_block, 10);

        processed(restarted.tick().await.unwrap());
        assert_eq!(second_handler.positions(), vec![(12, 0)]);
    }

    #[tokio::test]
    async fn parallel_dispatch_marks_every_event() {
        let fixture = Fixture::new(20);
        fixture
            .mock
            .push_logs((0..6).map(|log_index| transfer_log(6, log_index)));
        let mut config = config();
        config.max_parallel_dispatch = Some(4);
        let (listener, handler) = fixture.listener(config).await;

        let report = processed(listener.tick().await.unwrap());
        assert_eq!(report.dispatch.handled_count, 6);
        assert_eq!(handler.count(), 6);
        assert_eq!(listener.checkpoints().current().await.position(), (10, 0));
        assert_eq!(fixture.dedup_store.len(), 6);
    }

    #[tokio::test]
    async fn parallel_dispatch_keeps_order_within_a_contract() {
        let other = Address::repeat_byte(0xbb);
        let other_log = |block_number: u64, log_index: u64| {
            let mut log = transfer_log(block_number, log_index);
            log.inner.address = other;
            log
        };
        let fixture = Fixture::new(20);
        fixture.mock.push_logs(
            (0..4)
                .map(|log_index| transfer_log(3, log_index))
                .chain((0..4).map(|log_index| other_log(4, log_index))),
        );
        let mut config = config();
        config.addresses = vec![vault(), other];
        config.max_parallel_dispatch = Some(8);
        let (listener, handler) = fixture.listener(config).await;
        let handler = handler.with_delay(Duration::from_millis(10));

        let report = processed(listener.tick().await.unwrap());
        assert_eq!(report.dispatch.handled_count, 8);
        assert!(handler.max_in_flight() > 1);
        assert!(handler.max_in_flight() <= 2);

        let positions = handler.positions();
        let of_block = |block: u64| {
            positions
                .iter()
                .filter(|(block_number, _)| *block_number == block)
                .map(|(_, log_index)| *log_index)
                .collect::<Vec<_>>()
        };
        assert_eq!(of_block(3), vec![0, 1, 2, 3]);
        assert_eq!(of_block(4), vec![0, 1, 2, 3]);
        assert_eq!(fixture.dedup_store.len(), 8);
    }

    #[tokio::test]
    async fn run_catches_up_and_stops_on_shutdown() {
        let fixture = Fixture::new(40);
        fixture
            .mock
            .push_logs([transfer_log(2, 0), transfer_log(25, 0), transfer_log(37, 0)]);
        let (listener, handler) = fixture.listener(config()).await;
        let listener = Arc::new(listener);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let listener = listener.clone();
            let shutdown = shutdown.clone();
            async move { listener.run(shutdown).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while listener.checkpoints().current().await.last_block < 38 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener did not catch up");
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("listener did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(handler.positions(), vec![(2, 0), (25, 0), (37, 0)]);
        assert_eq!(
            listener.checkpoints().current().await.watched_addresses,
            vec![vault()]
        );
    }
}
