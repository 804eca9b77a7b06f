use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub ticket_id: Uuid,
    pub reference_type: String,
    pub reference_id: String,
    pub approved_amount: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub external_ref: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(external_ref: Option<String>) -> Self {
        Self {
            success: true,
            external_ref,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_ref: None,
            error: Some(error.into()),
        }
    }
}

/// Performs the action an approved ticket authorizes.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionOutcome>;
}

/// Gateway for deployments without a wired executor: records the approval only.
#[derive(Debug, Default)]
pub struct LoggingExecutionGateway;

#[async_trait]
impl ExecutionGateway for LoggingExecutionGateway {
    async fn execute(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionOutcome> {
        tracing::info!(
            ticket_id = %request.ticket_id,
            reference_type = %request.reference_type,
            reference_id = %request.reference_id,
            amount = %request.approved_amount,
            "approved action ready for execution"
        );
        Ok(ExecutionOutcome::succeeded(None))
    }
}
