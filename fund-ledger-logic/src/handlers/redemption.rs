use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    approval::{ApprovalWorkflowEngine, NewTicket, TicketType},
    dispatcher::EventHandler,
    events::{EventArgs, ParsedEvent, token_amount},
};

pub const REDEMPTION_REFERENCE_TYPE: &str = "redemption_request";

/// Opens a redemption approval ticket for large `RedeemRequested` events.
pub struct RedemptionApprovalHandler {
    engine: Arc<ApprovalWorkflowEngine>,
    threshold: Decimal,
    asset_decimals: u32,
}

impl RedemptionApprovalHandler {
    pub fn new(engine: Arc<ApprovalWorkflowEngine>, threshold: Decimal, asset_decimals: u32) -> Self {
        Self {
            engine,
            threshold,
            asset_decimals,
        }
    }
}

#[async_trait]
impl EventHandler for RedemptionApprovalHandler {
    fn name(&self) -> &str {
        "redemption_approval"
    }

    async fn handle(&self, event: &ParsedEvent) -> anyhow::Result<()> {
        let EventArgs::RedeemRequested(request) = &event.args else {
            return Ok(());
        };
        let assets = token_amount(request.assets, self.asset_decimals)?;
        if assets < self.threshold {
            tracing::debug!(
                request_id = %request.requestId,
                %assets,
                threshold = %self.threshold,
                "redemption below approval threshold"
            );
            return Ok(());
        }

        let reference_id = request.requestId.to_string();
        if let Some(existing) = self
            .engine
            .find_by_reference(REDEMPTION_REFERENCE_TYPE, &reference_id)
            .await?
        {
            tracing::debug!(
                ticket_id = %existing.id,
                request_id = %reference_id,
                "approval ticket already exists for redemption"
            );
            return Ok(());
        }

        let ticket = self
            .engine
            .create_ticket(NewTicket {
                ticket_type: TicketType::Redemption,
                reference_type: REDEMPTION_REFERENCE_TYPE.to_string(),
                reference_id: reference_id.clone(),
                requester: format!("{:#x}", request.owner),
                amount: assets,
                description: Some(format!("redemption request {reference_id} for {assets}")),
                request_data: json!({
                    "txHash": format!("{:#x}", event.tx_hash),
                    "blockNumber": event.block_number,
                    "logIndex": event.log_index,
                    "vault": format!("{:#x}", event.contract_address),
                    "owner": format!("{:#x}", request.owner),
                    "receiver": format!("{:#x}", request.receiver),
                    "shares": request.shares.to_string(),
                    "assets": request.assets.to_string(),
                }),
                risk_assessment: None,
            })
            .await
            .with_context(|| format!("failed to open approval ticket for redemption {reference_id}"))?;

        tracing::info!(
            ticket_id = %ticket.id,
            request_id = %reference_id,
            %assets,
            required_approvals = ticket.required_approvals,
            "redemption requires approval"
        );
        Ok(())
    }
}
