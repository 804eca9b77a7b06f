use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::types::{ApprovalLevel, TicketStatus, TicketType};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("ticket {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },
    #[error("ticket {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("ticket {0} not found")]
    NotFound(Uuid),
    #[error("ticket already resolved (status {status})")]
    AlreadyResolved { status: TicketStatus },
    #[error("insufficient approval level: {actual} is below required {required}")]
    InsufficientLevel {
        required: ApprovalLevel,
        actual: ApprovalLevel,
    },
    #[error("approver {0} is not allowed to act on this ticket")]
    NotAllowed(String),
    #[error("approver {0} has already voted on this ticket")]
    DuplicateVote(String),
    #[error("no approval rule matches {ticket_type} with amount {amount}")]
    NoMatchingRule {
        ticket_type: TicketType,
        amount: Decimal,
    },
    #[error("invalid ticket request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApprovalError {
    /// Validation failures caused by the caller; never worth retrying.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ApprovalError::Repository(_))
    }
}
