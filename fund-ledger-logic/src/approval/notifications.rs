use async_trait::async_trait;

use super::types::ApprovalTicket;

/// Receives escalations and terminal transitions; transport is up to the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn tickets_escalated(&self, tickets: &[ApprovalTicket]) -> anyhow::Result<()>;

    async fn ticket_resolved(&self, ticket: &ApprovalTicket) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn tickets_escalated(&self, tickets: &[ApprovalTicket]) -> anyhow::Result<()> {
        for ticket in tickets {
            tracing::warn!(
                ticket_id = %ticket.id,
                ticket_type = %ticket.ticket_type,
                escalated_to = ?ticket.escalated_to,
                sla_deadline_at = %ticket.sla_deadline_at,
                "approval ticket escalated"
            );
        }
        Ok(())
    }

    async fn ticket_resolved(&self, ticket: &ApprovalTicket) -> anyhow::Result<()> {
        tracing::info!(
            ticket_id = %ticket.id,
            status = %ticket.status,
            resolved_by = ?ticket.resolved_by,
            reason = ?ticket.result_reason,
            "approval ticket resolved"
        );
        Ok(())
    }
}
