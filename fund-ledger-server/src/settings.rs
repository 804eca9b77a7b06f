use blockscout_service_launcher::{
    database::DatabaseSettings,
    launcher::ConfigSettings,
    tracing::{JaegerSettings, TracingSettings},
};
use fund_ledger_logic::settings::{
    ApprovalSettings, ChainSettings, CheckpointBackendSettings, ListenerSettings,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub chain: ChainSettings,
    pub listener: ListenerSettings,
    #[serde(default)]
    pub approval: ApprovalSettings,
    /// Required by the database checkpoint backend and the shared dedup store.
    #[serde(default)]
    pub database: Option<DatabaseSettings>,

    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub jaeger: JaegerSettings,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "FUND_LEDGER";

    fn validate(&self) -> anyhow::Result<()> {
        if self.chain.endpoints.is_empty() {
            anyhow::bail!("chain.endpoints must contain at least one rpc endpoint");
        }
        if self.chain.max_retries == 0 {
            anyhow::bail!("chain.max_retries must be positive");
        }
        if self.listener.batch_size == 0 {
            anyhow::bail!("listener.batch_size must be positive");
        }
        if self.listener.dedup.local_capacity == 0 {
            anyhow::bail!("listener.dedup.local_capacity must be positive");
        }
        if self.listener.dedup.purge_interval.is_zero() {
            anyhow::bail!("listener.dedup.purge_interval must be positive");
        }
        if self.approval.sweep_interval.is_zero() {
            anyhow::bail!("approval.sweep_interval must be positive");
        }
        if self.database.is_none() {
            if self.listener.checkpoint == CheckpointBackendSettings::Database {
                anyhow::bail!("database settings are required by the database checkpoint backend");
            }
            if self.listener.dedup.shared {
                anyhow::bail!("database settings are required by the shared dedup store");
            }
        }
        if self.approval.rules.is_empty() {
            anyhow::bail!("approval.rules must not be empty");
        }
        Ok(())
    }
}
