//! Multi-level approval workflow for sensitive fund operations.

mod engine;
mod error;
mod gateway;
mod notifications;
mod repository;
mod rules;
mod sweeper;
mod types;

pub use engine::{ActionOutcome, ApprovalWorkflowEngine};
pub use error::{ApprovalError, RepositoryError};
pub use gateway::{ExecutionGateway, ExecutionOutcome, ExecutionRequest, LoggingExecutionGateway};
pub use notifications::{LoggingNotificationSink, NotificationSink};
pub use repository::{InMemoryTicketRepository, TicketRepository};
pub use rules::{ApprovalRule, EscalationPolicy, RuleTable, StaticRuleTable};
pub use sweeper::{SlaSweeper, SweepReport};
pub use types::{
    ApprovalAction, ApprovalLevel, ApprovalRecord, ApprovalTicket, Approver, NewTicket,
    TicketFilter, TicketResult, TicketStatus, TicketType,
};
