use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::approval::{ApprovalLevel, ApprovalRule, EscalationPolicy, TicketType};

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    pub chain_id: u64,
    /// Ranked endpoints; the first one is the initial current endpoint.
    pub endpoints: Vec<EndpointSettings>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EndpointSettings {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub max_rps: Option<u32>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ListenerSettings {
    pub vault_address: Address,
    /// Other contracts whose logs are decoded with the same catalog.
    #[serde(default)]
    pub extra_addresses: Vec<Address>,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_error_backoff")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub error_backoff: Duration,
    /// Concurrent contracts per batch; one contract's events always run in order.
    #[serde(default)]
    pub max_parallel_dispatch: Option<usize>,
    /// Checkpoint scope; defaults to `<chain_id>:<vault address>`.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub checkpoint: CheckpointBackendSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
}

impl ListenerSettings {
    pub fn watched_addresses(&self) -> Vec<Address> {
        std::iter::once(self.vault_address)
            .chain(self.extra_addresses.iter().copied())
            .unique()
            .collect()
    }

    pub fn scope(&self, chain_id: u64) -> String {
        self.scope
            .clone()
            .unwrap_or_else(|| format!("{chain_id}:{:#x}", self.vault_address))
    }
}

fn default_batch_size() -> u64 {
    500
}

fn default_confirmations() -> u64 {
    6
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CheckpointBackendSettings {
    #[default]
    Database,
    File {
        path: PathBuf,
    },
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DedupSettings {
    pub local_capacity: usize,
    /// Use the database as the shared dedup store.
    pub shared: bool,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub shared_ttl: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub purge_interval: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            local_capacity: 100_000,
            shared: true,
            shared_ttl: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalSettings {
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub sweep_interval: Duration,
    /// Redemption requests at or above this amount (in asset units) need a ticket.
    pub redemption_threshold: Decimal,
    pub asset_decimals: u32,
    pub rules: Vec<ApprovalRule>,
    pub escalation: Vec<EscalationSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EscalationSettings {
    pub ticket_type: TicketType,
    pub escalate_after_hours: u32,
    #[serde(default)]
    pub notify: Vec<String>,
}

impl EscalationSettings {
    pub fn policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            escalate_after_hours: self.escalate_after_hours,
            notify: self.notify.clone(),
        }
    }
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            redemption_threshold: Decimal::from(100_000),
            asset_decimals: 18,
            rules: default_rules(),
            escalation: vec![EscalationSettings {
                ticket_type: TicketType::Redemption,
                escalate_after_hours: 4,
                notify: vec![],
            }],
        }
    }
}

fn rule(
    ticket_type: TicketType,
    min_amount: i64,
    max_amount: Option<i64>,
    required_approvals: u32,
    required_level: ApprovalLevel,
    sla_hours: (u32, u32),
) -> ApprovalRule {
    ApprovalRule {
        ticket_type,
        min_amount: Decimal::from(min_amount),
        max_amount: max_amount.map(Decimal::from),
        required_approvals,
        required_level,
        allowed_approvers: vec![],
        sla_warning_hours: sla_hours.0,
        sla_deadline_hours: sla_hours.1,
    }
}

fn default_rules() -> Vec<ApprovalRule> {
    use ApprovalLevel::*;
    use TicketType::*;

    vec![
        rule(Redemption, 0, Some(1_000_000), 1, Manager, (12, 24)),
        rule(Redemption, 1_000_000, Some(10_000_000), 2, Director, (12, 24)),
        rule(Redemption, 10_000_000, None, 3, Executive, (24, 48)),
        rule(Withdrawal, 0, None, 2, Director, (12, 24)),
        rule(FeeCollection, 0, None, 1, Manager, (24, 72)),
        rule(NavUpdate, 0, None, 2, Manager, (4, 8)),
        rule(EmergencyAction, 0, None, 2, Executive, (1, 2)),
        rule(ConfigChange, 0, None, 2, Director, (24, 72)),
    ]
}
