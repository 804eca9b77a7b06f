use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{engine::ApprovalWorkflowEngine, error::ApprovalError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub escalated: usize,
}

/// Periodically expires and escalates approval tickets.
pub struct SlaSweeper {
    engine: Arc<ApprovalWorkflowEngine>,
    interval: Duration,
}

impl SlaSweeper {
    pub fn new(engine: Arc<ApprovalWorkflowEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Expiration runs first so an expired ticket is never escalated.
    pub async fn sweep_once(&self) -> Result<SweepReport, ApprovalError> {
        let expired = self.engine.check_expired_tickets().await?;
        let escalated = self.engine.check_escalation().await?;
        Ok(SweepReport {
            expired: expired.len(),
            escalated: escalated.len(),
        })
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, "starting sla sweeper");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::info!(
                            expired = report.expired,
                            escalated = report.escalated,
                            "sla sweep finished"
                        );
                    }
                    Ok(_) => tracing::debug!("sla sweep found nothing to do"),
                    Err(err) => tracing::error!(err = ?err, "sla sweep failed"),
                },
            }
        }

        tracing::info!("sla sweeper stopped");
    }
}
