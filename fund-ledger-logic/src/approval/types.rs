use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    PartiallyApproved,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl TicketStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TicketStatus::Approved
                | TicketStatus::Rejected
                | TicketStatus::Expired
                | TicketStatus::Cancelled
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketResult {
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TicketType {
    Redemption,
    Withdrawal,
    FeeCollection,
    NavUpdate,
    EmergencyAction,
    ConfigChange,
}

/// Approval authority, ordered from lowest to highest.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalLevel {
    Operator,
    Manager,
    Director,
    Executive,
}

/// Authenticated actor voting on tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub level: ApprovalLevel,
}

impl Approver {
    pub fn new(id: impl Into<String>, level: ApprovalLevel) -> Self {
        Self {
            id: id.into(),
            level,
        }
    }
}

/// Everything needed to open a ticket; the rule table decides the rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub ticket_type: TicketType,
    pub reference_type: String,
    pub reference_id: String,
    pub requester: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub request_data: serde_json::Value,
    pub risk_assessment: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub id: Uuid,
    pub ticket_type: TicketType,
    pub reference_type: String,
    pub reference_id: String,
    pub requester: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub request_data: serde_json::Value,
    pub risk_assessment: Option<serde_json::Value>,
    pub status: TicketStatus,
    pub required_approvals: u32,
    pub required_level: ApprovalLevel,
    pub allowed_approvers: Vec<String>,
    pub current_approvals: u32,
    pub current_rejections: u32,
    pub sla_warning_at: DateTime<Utc>,
    pub sla_deadline_at: DateTime<Utc>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_to: Vec<String>,
    pub result: Option<TicketResult>,
    pub result_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every persisted mutation.
    pub version: u64,
}

impl ApprovalTicket {
    pub(crate) fn resolve(
        &mut self,
        status: TicketStatus,
        result: TicketResult,
        reason: Option<String>,
        resolved_by: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.result = Some(result);
        self.result_reason = reason;
        self.resolved_at = Some(now);
        self.resolved_by = resolved_by;
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

/// Immutable audit entry for a single vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub approver: String,
    pub approver_level: ApprovalLevel,
    pub action: ApprovalAction,
    pub reason: Option<String>,
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketFilter {
    /// Empty matches any status.
    pub statuses: Vec<TicketStatus>,
    pub ticket_type: Option<TicketType>,
    pub requester: Option<String>,
    pub limit: Option<usize>,
}

impl TicketFilter {
    pub fn open() -> Self {
        Self {
            statuses: vec![TicketStatus::Pending, TicketStatus::PartiallyApproved],
            ..Default::default()
        }
    }

    pub fn matches(&self, ticket: &ApprovalTicket) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&ticket.status))
            && self.ticket_type.is_none_or(|t| t == ticket.ticket_type)
            && self
                .requester
                .as_ref()
                .is_none_or(|requester| requester == &ticket.requester)
    }
}
