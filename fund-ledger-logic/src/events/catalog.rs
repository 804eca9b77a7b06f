use std::collections::HashMap;

use alloy::{primitives::B256, rpc::types::Log, sol_types::SolEvent};
use strum::IntoEnumIterator;

use super::{DecodeError, EventArgs, EventKind, ParsedEvent, abi::IFundVault};

/// Static topic table for the vault events.
#[derive(Clone, Debug)]
pub struct EventCatalog {
    by_signature: HashMap<B256, EventKind>,
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCatalog {
    pub fn new() -> Self {
        let by_signature = EventKind::iter()
            .map(|kind| (signature_hash(kind), kind))
            .collect();
        Self { by_signature }
    }

    /// First-topic values of every known event, in catalog order.
    pub fn topics(&self) -> Vec<B256> {
        EventKind::iter().map(signature_hash).collect()
    }

    pub fn kind_of(&self, topic: &B256) -> Option<EventKind> {
        self.by_signature.get(topic).copied()
    }

    pub fn decode(&self, log: &Log) -> Result<ParsedEvent, DecodeError> {
        if log.removed {
            return Err(DecodeError::Removed);
        }
        let topic = log.topics().first().ok_or(DecodeError::MissingTopic)?;
        let kind = self
            .kind_of(topic)
            .ok_or(DecodeError::UnknownSignature(*topic))?;

        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transactionHash"))?;
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField("blockNumber"))?;
        let log_index = log
            .log_index
            .ok_or(DecodeError::MissingField("logIndex"))?;

        let args = decode_args(kind, log).map_err(|source| DecodeError::Abi { kind, source })?;

        Ok(ParsedEvent {
            kind,
            tx_hash,
            block_number,
            log_index,
            block_timestamp: log.block_timestamp,
            contract_address: log.address(),
            args,
            raw_log: log.clone(),
        })
    }

    /// Decodes a batch in `(block_number, log_index)` order; undecodable logs are dropped.
    pub fn decode_batch(&self, logs: &[Log]) -> Vec<ParsedEvent> {
        let mut events: Vec<ParsedEvent> = logs
            .iter()
            .filter_map(|log| match self.decode(log) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(
                        tx_hash = ?log.transaction_hash,
                        block_number = ?log.block_number,
                        log_index = ?log.log_index,
                        err = %err,
                        "dropping undecodable log"
                    );
                    None
                }
            })
            .collect();
        events.sort_by_key(ParsedEvent::position);
        events
    }
}

fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::Deposit => IFundVault::Deposit::SIGNATURE_HASH,
        EventKind::Withdraw => IFundVault::Withdraw::SIGNATURE_HASH,
        EventKind::RedeemRequested => IFundVault::RedeemRequested::SIGNATURE_HASH,
        EventKind::RedeemProcessed => IFundVault::RedeemProcessed::SIGNATURE_HASH,
        EventKind::Transfer => IFundVault::Transfer::SIGNATURE_HASH,
        EventKind::NavUpdated => IFundVault::NavUpdated::SIGNATURE_HASH,
        EventKind::FeesCollected => IFundVault::FeesCollected::SIGNATURE_HASH,
        EventKind::Paused => IFundVault::Paused::SIGNATURE_HASH,
        EventKind::Unpaused => IFundVault::Unpaused::SIGNATURE_HASH,
    }
}

fn decode_args(kind: EventKind, log: &Log) -> alloy::sol_types::Result<EventArgs> {
    let args = match kind {
        EventKind::Deposit => EventArgs::Deposit(log.log_decode::<IFundVault::Deposit>()?.inner.data),
        EventKind::Withdraw => {
            EventArgs::Withdraw(log.log_decode::<IFundVault::Withdraw>()?.inner.data)
        }
        EventKind::RedeemRequested => EventArgs::RedeemRequested(
            log.log_decode::<IFundVault::RedeemRequested>()?.inner.data,
        ),
        EventKind::RedeemProcessed => EventArgs::RedeemProcessed(
            log.log_decode::<IFundVault::RedeemProcessed>()?.inner.data,
        ),
        EventKind::Transfer => {
            EventArgs::Transfer(log.log_decode::<IFundVault::Transfer>()?.inner.data)
        }
        EventKind::NavUpdated => {
            EventArgs::NavUpdated(log.log_decode::<IFundVault::NavUpdated>()?.inner.data)
        }
        EventKind::FeesCollected => {
            EventArgs::FeesCollected(log.log_decode::<IFundVault::FeesCollected>()?.inner.data)
        }
        EventKind::Paused => EventArgs::Paused(log.log_decode::<IFundVault::Paused>()?.inner.data),
        EventKind::Unpaused => {
            EventArgs::Unpaused(log.log_decode::<IFundVault::Unpaused>()?.inner.data)
        }
    };
    Ok(args)
}
