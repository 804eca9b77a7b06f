use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    error::ApprovalError,
    gateway::{ExecutionGateway, ExecutionOutcome, ExecutionRequest},
    notifications::NotificationSink,
    repository::TicketRepository,
    rules::RuleTable,
    types::{
        ApprovalAction, ApprovalRecord, ApprovalTicket, Approver, NewTicket, TicketFilter,
        TicketResult, TicketStatus,
    },
};
use crate::{
    clock::{Clock, SystemClock},
    metrics,
};

const EXPIRED_REASON: &str = "SLA deadline exceeded";

/// Result of a single vote.
#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub ticket: ApprovalTicket,
    pub record: ApprovalRecord,
    /// Present only for the vote that approved the ticket.
    pub execution: Option<ExecutionOutcome>,
}

/// Multi-level approval workflow over a [`TicketRepository`].
///
/// Every mutation of a ticket happens under that ticket's async mutex and
/// re-reads the stored state first, so concurrent votes, cancellations and
/// sweeps observe each other's effects.
pub struct ApprovalWorkflowEngine {
    repository: Arc<dyn TicketRepository>,
    rules: Arc<dyn RuleTable>,
    gateway: Arc<dyn ExecutionGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ApprovalWorkflowEngine {
    pub fn new(
        repository: Arc<dyn TicketRepository>,
        rules: Arc<dyn RuleTable>,
        gateway: Arc<dyn ExecutionGateway>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            rules,
            gateway,
            notifier,
            clock: Arc::new(SystemClock),
            locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn create_ticket(&self, request: NewTicket) -> Result<ApprovalTicket, ApprovalError> {
        if request.reference_type.is_empty() || request.reference_id.is_empty() {
            return Err(ApprovalError::InvalidRequest(
                "reference type and id must not be empty".to_string(),
            ));
        }
        let rule = self
            .rules
            .resolve(request.ticket_type, request.amount)
            .ok_or(ApprovalError::NoMatchingRule {
                ticket_type: request.ticket_type,
                amount: request.amount,
            })?;
        if rule.required_approvals == 0 {
            return Err(ApprovalError::InvalidRequest(format!(
                "rule for {} requires no approvals",
                request.ticket_type
            )));
        }

        let now = self.clock.now();
        let ticket = ApprovalTicket {
            id: Uuid::new_v4(),
            ticket_type: request.ticket_type,
            reference_type: request.reference_type,
            reference_id: request.reference_id,
            requester: request.requester,
            amount: request.amount,
            description: request.description,
            request_data: request.request_data,
            risk_assessment: request.risk_assessment,
            status: TicketStatus::Pending,
            required_approvals: rule.required_approvals,
            required_level: rule.required_level,
            allowed_approvers: rule.allowed_approvers,
            current_approvals: 0,
            current_rejections: 0,
            sla_warning_at: now + Duration::hours(rule.sla_warning_hours.into()),
            sla_deadline_at: now + Duration::hours(rule.sla_deadline_hours.into()),
            escalated_at: None,
            escalated_to: vec![],
            result: None,
            result_reason: None,
            resolved_at: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.repository.insert(&ticket).await.inspect_err(|err| {
            tracing::error!(err = ?err, reference_id = %ticket.reference_id, "failed to store approval ticket")
        })?;
        record_transition(&ticket);

        tracing::info!(
            ticket_id = %ticket.id,
            ticket_type = %ticket.ticket_type,
            reference_type = %ticket.reference_type,
            reference_id = %ticket.reference_id,
            amount = %ticket.amount,
            required_approvals = ticket.required_approvals,
            required_level = %ticket.required_level,
            "approval ticket created"
        );
        Ok(ticket)
    }

    pub async fn process_action(
        &self,
        ticket_id: Uuid,
        approver: &Approver,
        action: ApprovalAction,
        reason: Option<String>,
        signature: Option<String>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let _guard = self.lock_open_ticket(ticket_id).await?;
        let mut ticket = self.reload_open(ticket_id).await?;
        let now = self.clock.now();
        if is_past_deadline(&ticket, now) {
            self.expire(&mut ticket, now).await?;
            return Err(ApprovalError::AlreadyResolved {
                status: ticket.status,
            });
        }
        authorize(&ticket, approver)?;
        let records = self.repository.records(ticket_id).await?;
        if records.iter().any(|record| record.approver == approver.id) {
            return Err(ApprovalError::DuplicateVote(approver.id.clone()));
        }

        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            ticket_id,
            approver: approver.id.clone(),
            approver_level: approver.level,
            action,
            reason: reason.clone(),
            signature,
            timestamp: now,
        };
        let expected_version = ticket.version;
        match action {
            ApprovalAction::Approve => {
                ticket.current_approvals += 1;
                if ticket.current_approvals >= ticket.required_approvals {
                    ticket.resolve(
                        TicketStatus::Approved,
                        TicketResult::Approved,
                        reason,
                        Some(approver.id.clone()),
                        now,
                    );
                } else {
                    ticket.status = TicketStatus::PartiallyApproved;
                }
            }
            ApprovalAction::Reject => {
                ticket.current_rejections += 1;
                ticket.resolve(
                    TicketStatus::Rejected,
                    TicketResult::Rejected,
                    reason,
                    Some(approver.id.clone()),
                    now,
                );
            }
        }
        ticket.touch(now);
        self.repository
            .commit_vote(&ticket, expected_version, &record)
            .await?;
        record_transition(&ticket);

        tracing::info!(
            ticket_id = %ticket.id,
            approver = %approver.id,
            action = %action,
            status = %ticket.status,
            approvals = ticket.current_approvals,
            required = ticket.required_approvals,
            "approval vote recorded"
        );

        let execution = if ticket.status == TicketStatus::Approved {
            Some(self.execute(&ticket).await)
        } else {
            None
        };
        if ticket.status.is_terminal() {
            self.finish(&ticket).await;
        }

        Ok(ActionOutcome {
            ticket,
            record,
            execution,
        })
    }

    pub async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalTicket, ApprovalError> {
        let _guard = self.lock_open_ticket(ticket_id).await?;
        let mut ticket = self.reload_open(ticket_id).await?;

        let now = self.clock.now();
        let expected_version = ticket.version;
        ticket.resolve(
            TicketStatus::Cancelled,
            TicketResult::Cancelled,
            reason,
            Some(actor.to_string()),
            now,
        );
        ticket.touch(now);
        self.repository.update(&ticket, expected_version).await?;
        record_transition(&ticket);
        tracing::info!(ticket_id = %ticket.id, actor, "approval ticket cancelled");

        self.finish(&ticket).await;
        Ok(ticket)
    }

    /// Escalates open tickets whose warning window plus the type's escalation
    /// delay has passed. A ticket is escalated at most once.
    pub async fn check_escalation(&self) -> Result<Vec<ApprovalTicket>, ApprovalError> {
        let now = self.clock.now();
        let candidates = self.repository.list(&TicketFilter::open()).await?;

        let mut escalated = Vec::new();
        for candidate in candidates {
            let Some(policy) = self.rules.escalation_policy(candidate.ticket_type) else {
                continue;
            };
            let due_at = |ticket: &ApprovalTicket| {
                ticket.sla_warning_at + Duration::hours(policy.escalate_after_hours.into())
            };
            if candidate.escalated_at.is_some() || now < due_at(&candidate) {
                continue;
            }

            let _guard = self.lock_ticket(candidate.id).await;
            let mut ticket = match self.load(candidate.id).await {
                Ok(ticket) => ticket,
                Err(err) => {
                    tracing::warn!(err = ?err, ticket_id = %candidate.id, "failed to reload ticket for escalation");
                    continue;
                }
            };
            if ticket.status.is_terminal() || ticket.escalated_at.is_some() || now < due_at(&ticket)
            {
                continue;
            }

            let expected_version = ticket.version;
            ticket.escalated_at = Some(now);
            ticket.escalated_to = policy.notify.clone();
            ticket.touch(now);
            match self.repository.update(&ticket, expected_version).await {
                Ok(()) => escalated.push(ticket),
                Err(err) => {
                    tracing::error!(err = ?err, ticket_id = %ticket.id, "failed to escalate ticket")
                }
            }
        }

        if !escalated.is_empty() {
            tracing::warn!(count = escalated.len(), "approval tickets escalated");
            if let Err(err) = self.notifier.tickets_escalated(&escalated).await {
                tracing::error!(err = ?err, "failed to deliver escalation notifications");
            }
        }
        Ok(escalated)
    }

    /// Expires open tickets past their SLA deadline.
    pub async fn check_expired_tickets(&self) -> Result<Vec<ApprovalTicket>, ApprovalError> {
        let now = self.clock.now();
        let candidates = self.repository.list(&TicketFilter::open()).await?;

        let mut expired = Vec::new();
        for candidate in candidates
            .into_iter()
            .filter(|ticket| is_past_deadline(ticket, now))
        {
            let _guard = self.lock_ticket(candidate.id).await;
            let mut ticket = match self.load(candidate.id).await {
                Ok(ticket) => ticket,
                Err(err) => {
                    tracing::warn!(err = ?err, ticket_id = %candidate.id, "failed to reload ticket for expiration");
                    continue;
                }
            };
            if !is_past_deadline(&ticket, now) {
                continue;
            }

            match self.expire(&mut ticket, now).await {
                Ok(()) => expired.push(ticket),
                Err(err) => {
                    tracing::error!(err = ?err, ticket_id = %ticket.id, "failed to expire ticket")
                }
            }
        }
        Ok(expired)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<ApprovalTicket, ApprovalError> {
        self.load(ticket_id).await
    }

    pub async fn list_tickets(
        &self,
        filter: &TicketFilter,
    ) -> Result<Vec<ApprovalTicket>, ApprovalError> {
        Ok(self.repository.list(filter).await?)
    }

    /// Audit trail of votes, in the order they were cast.
    pub async fn ticket_records(
        &self,
        ticket_id: Uuid,
    ) -> Result<Vec<ApprovalRecord>, ApprovalError> {
        self.load(ticket_id).await?;
        Ok(self.repository.records(ticket_id).await?)
    }

    pub async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<ApprovalTicket>, ApprovalError> {
        Ok(self
            .repository
            .find_by_reference(reference_type, reference_id)
            .await?)
    }

    async fn lock_ticket(&self, ticket_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(ticket_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Unknown and resolved tickets are rejected before a lock entry is created.
    async fn lock_open_ticket(
        &self,
        ticket_id: Uuid,
    ) -> Result<OwnedMutexGuard<()>, ApprovalError> {
        let ticket = self.load(ticket_id).await?;
        if ticket.status.is_terminal() {
            return Err(ApprovalError::AlreadyResolved {
                status: ticket.status,
            });
        }
        Ok(self.lock_ticket(ticket_id).await)
    }

    /// Re-reads a ticket under its lock; a ticket resolved meanwhile releases its entry.
    async fn reload_open(&self, ticket_id: Uuid) -> Result<ApprovalTicket, ApprovalError> {
        let ticket = self.load(ticket_id).await?;
        if ticket.status.is_terminal() {
            self.locks.remove(&ticket_id);
            return Err(ApprovalError::AlreadyResolved {
                status: ticket.status,
            });
        }
        Ok(ticket)
    }

    /// Must be called under the ticket lock with an open ticket.
    async fn expire(
        &self,
        ticket: &mut ApprovalTicket,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        let expected_version = ticket.version;
        ticket.resolve(
            TicketStatus::Expired,
            TicketResult::Expired,
            Some(EXPIRED_REASON.to_string()),
            None,
            now,
        );
        ticket.touch(now);
        self.repository.update(ticket, expected_version).await?;
        record_transition(ticket);
        tracing::warn!(
            ticket_id = %ticket.id,
            sla_deadline_at = %ticket.sla_deadline_at,
            "approval ticket expired"
        );
        self.finish(ticket).await;
        Ok(())
    }

    async fn load(&self, ticket_id: Uuid) -> Result<ApprovalTicket, ApprovalError> {
        self.repository
            .get(ticket_id)
            .await?
            .ok_or(ApprovalError::NotFound(ticket_id))
    }

    /// The approval decision stands whatever the gateway returns.
    async fn execute(&self, ticket: &ApprovalTicket) -> ExecutionOutcome {
        let request = ExecutionRequest {
            ticket_id: ticket.id,
            reference_type: ticket.reference_type.clone(),
            reference_id: ticket.reference_id.clone(),
            approved_amount: ticket.amount,
        };
        let outcome = match self.gateway.execute(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(err = ?err, ticket_id = %ticket.id, "execution gateway call failed");
                ExecutionOutcome::failed(format!("{err:#}"))
            }
        };
        if outcome.success {
            tracing::info!(
                ticket_id = %ticket.id,
                external_ref = ?outcome.external_ref,
                "approved action executed"
            );
        } else {
            tracing::error!(
                ticket_id = %ticket.id,
                error = ?outcome.error,
                "approved action failed to execute"
            );
        }
        metrics::APPROVAL_EXECUTIONS_TOTAL
            .with_label_values(&[if outcome.success { "ok" } else { "error" }])
            .inc();
        outcome
    }

    /// Terminal tickets never change again; drop their lock and notify.
    async fn finish(&self, ticket: &ApprovalTicket) {
        self.locks.remove(&ticket.id);
        if let Err(err) = self.notifier.ticket_resolved(ticket).await {
            tracing::error!(err = ?err, ticket_id = %ticket.id, "failed to deliver resolution notification");
        }
    }
}

fn authorize(ticket: &ApprovalTicket, approver: &Approver) -> Result<(), ApprovalError> {
    if approver.level < ticket.required_level {
        return Err(ApprovalError::InsufficientLevel {
            required: ticket.required_level,
            actual: approver.level,
        });
    }
    if !ticket.allowed_approvers.is_empty()
        && !ticket.allowed_approvers.contains(&approver.id)
        && !ticket.escalated_to.contains(&approver.id)
    {
        return Err(ApprovalError::NotAllowed(approver.id.clone()));
    }
    Ok(())
}

fn is_past_deadline(ticket: &ApprovalTicket, now: DateTime<Utc>) -> bool {
    ticket.status.is_open() && now >= ticket.sla_deadline_at
}

fn record_transition(ticket: &ApprovalTicket) {
    let ticket_type: &'static str = ticket.ticket_type.into();
    let status: &'static str = ticket.status.into();
    metrics::APPROVAL_TICKETS_TOTAL
        .with_label_values(&[ticket_type, status])
        .inc();
}
