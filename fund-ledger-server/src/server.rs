use std::{sync::Arc, time::Duration};

use anyhow::Context;
use blockscout_service_launcher::{database, tracing as launcher_tracing};
use fund_ledger_logic::{
    ApprovalWorkflowEngine, ChainReader, CheckpointManager, CheckpointStore, Deduplicator,
    EventDispatcher, EventKind, EventListener, SharedDedupStore, SlaSweeper,
    approval::{
        InMemoryTicketRepository, LoggingExecutionGateway, LoggingNotificationSink,
        StaticRuleTable,
    },
    checkpoint::{FileCheckpointStore, PostgresCheckpointStore},
    dedup::PostgresDedupStore,
    dispatcher::LoggingMiddleware,
    handlers::RedemptionApprovalHandler,
    settings::CheckpointBackendSettings,
};
use migration::Migrator;
use sea_orm::DatabaseConnection;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::settings::Settings;

const SERVICE_NAME: &str = "fund_ledger";

/// Everything the background tasks need, wired from settings.
pub struct Components {
    pub listener: Arc<EventListener>,
    pub engine: Arc<ApprovalWorkflowEngine>,
    pub sweeper: Arc<SlaSweeper>,
    pub dedup_store: Option<Arc<dyn SharedDedupStore>>,
}

impl Components {
    pub async fn build(
        settings: &Settings,
        db: Option<Arc<DatabaseConnection>>,
    ) -> anyhow::Result<Self> {
        let reader = Arc::new(
            ChainReader::from_settings(&settings.chain).context("failed to set up rpc endpoints")?,
        );

        let checkpoint_store: Arc<dyn CheckpointStore> = match &settings.listener.checkpoint {
            CheckpointBackendSettings::Database => {
                let db = db
                    .clone()
                    .context("database checkpoint backend requires database settings")?;
                let scope = settings.listener.scope(settings.chain.chain_id);
                tracing::info!(scope = %scope, "using database checkpoint store");
                Arc::new(PostgresCheckpointStore::new(db, scope))
            }
            CheckpointBackendSettings::File { path } => {
                tracing::info!(path = %path.display(), "using file checkpoint store");
                Arc::new(FileCheckpointStore::new(path.clone()))
            }
        };
        let checkpoints = Arc::new(
            CheckpointManager::load(checkpoint_store)
                .await
                .context("failed to load listener checkpoint")?,
        );

        let dedup_settings = &settings.listener.dedup;
        let mut dedup = Deduplicator::new(dedup_settings.local_capacity);
        let mut dedup_store = None;
        if dedup_settings.shared {
            let db = db
                .clone()
                .context("shared dedup store requires database settings")?;
            let store: Arc<dyn SharedDedupStore> = Arc::new(PostgresDedupStore::new(db));
            dedup = dedup.with_shared_store(store.clone(), dedup_settings.shared_ttl);
            dedup_store = Some(store);
        }

        let approval = &settings.approval;
        let rules = StaticRuleTable::new(
            approval.rules.clone(),
            approval
                .escalation
                .iter()
                .map(|escalation| (escalation.ticket_type, escalation.policy())),
        );
        let engine = Arc::new(ApprovalWorkflowEngine::new(
            Arc::new(InMemoryTicketRepository::new()),
            Arc::new(rules),
            Arc::new(LoggingExecutionGateway),
            Arc::new(LoggingNotificationSink),
        ));
        let sweeper = Arc::new(SlaSweeper::new(engine.clone(), approval.sweep_interval));

        let dispatcher = EventDispatcher::new();
        dispatcher.add_middleware(Arc::new(LoggingMiddleware));
        dispatcher.register_handler(
            EventKind::RedeemRequested,
            Arc::new(RedemptionApprovalHandler::new(
                engine.clone(),
                approval.redemption_threshold,
                approval.asset_decimals,
            )),
            100,
        );

        let listener = Arc::new(EventListener::new(
            reader,
            Arc::new(dedup),
            Arc::new(dispatcher),
            checkpoints,
            (&settings.listener).into(),
        ));

        Ok(Self {
            listener,
            engine,
            sweeper,
            dedup_store,
        })
    }
}

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    launcher_tracing::init_logs(SERVICE_NAME, &settings.tracing, &settings.jaeger)?;

    let db = match &settings.database {
        Some(database_settings) => Some(Arc::new(
            database::initialize_postgres::<Migrator>(database_settings).await?,
        )),
        None => None,
    };
    let components = Components::build(&settings, db).await?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn({
        let listener = components.listener.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = listener.run(shutdown.clone()).await {
                tracing::error!(err = ?err, "event listener terminated");
                shutdown.cancel();
            }
        }
    });
    tracker.spawn({
        let sweeper = components.sweeper.clone();
        let shutdown = shutdown.clone();
        async move { sweeper.run(shutdown).await }
    });
    if let Some(store) = components.dedup_store.clone() {
        tracker.spawn(purge_expired_dedup_keys(
            store,
            settings.listener.dedup.purge_interval,
            shutdown.clone(),
        ));
    }
    tracker.close();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received, draining tasks");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    tracker.wait().await;

    tracing::info!("fund ledger stopped");
    Ok(())
}

async fn purge_expired_dedup_keys(
    store: Arc<dyn SharedDedupStore>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "purged expired dedup keys"),
                Err(err) => tracing::warn!(err = ?err, "failed to purge expired dedup keys"),
            },
        }
    }
}
