pub mod abi;
mod catalog;

pub use catalog::EventCatalog;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
};
use rust_decimal::Decimal;
use strum::{Display, EnumIter, IntoStaticStr};
use thiserror::Error;

use abi::IFundVault;

/// Every vault event the catalog can decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum EventKind {
    Deposit,
    Withdraw,
    RedeemRequested,
    RedeemProcessed,
    Transfer,
    NavUpdated,
    FeesCollected,
    Paused,
    Unpaused,
}

/// Decoded event fields, one variant per [`EventKind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventArgs {
    Deposit(IFundVault::Deposit),
    Withdraw(IFundVault::Withdraw),
    RedeemRequested(IFundVault::RedeemRequested),
    RedeemProcessed(IFundVault::RedeemProcessed),
    Transfer(IFundVault::Transfer),
    NavUpdated(IFundVault::NavUpdated),
    FeesCollected(IFundVault::FeesCollected),
    Paused(IFundVault::Paused),
    Unpaused(IFundVault::Unpaused),
}

impl EventArgs {
    pub fn kind(&self) -> EventKind {
        match self {
            EventArgs::Deposit(_) => EventKind::Deposit,
            EventArgs::Withdraw(_) => EventKind::Withdraw,
            EventArgs::RedeemRequested(_) => EventKind::RedeemRequested,
            EventArgs::RedeemProcessed(_) => EventKind::RedeemProcessed,
            EventArgs::Transfer(_) => EventKind::Transfer,
            EventArgs::NavUpdated(_) => EventKind::NavUpdated,
            EventArgs::FeesCollected(_) => EventKind::FeesCollected,
            EventArgs::Paused(_) => EventKind::Paused,
            EventArgs::Unpaused(_) => EventKind::Unpaused,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedEvent {
    pub kind: EventKind,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    /// Present only when the node returns `blockTimestamp` on logs.
    pub block_timestamp: Option<u64>,
    pub contract_address: Address,
    pub args: EventArgs,
    pub raw_log: Log,
}

impl ParsedEvent {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,
    #[error("unknown event signature {0}")]
    UnknownSignature(B256),
    #[error("log is missing {0}")]
    MissingField(&'static str),
    #[error("log was removed by a chain reorganization")]
    Removed,
    #[error("failed to decode {kind} log: {source}")]
    Abi {
        kind: EventKind,
        #[source]
        source: alloy::sol_types::Error,
    },
}

/// Converts an on-chain integer amount with `decimals` fractional digits into a decimal.
pub fn token_amount(value: U256, decimals: u32) -> anyhow::Result<Decimal> {
    let raw = i128::try_from(value)
        .map_err(|_| anyhow::anyhow!("amount {value} does not fit into a decimal"))?;
    let amount = Decimal::try_from_i128_with_scale(raw, decimals)
        .map_err(|e| anyhow::anyhow!("amount {value} with {decimals} decimals: {e}"))?;
    Ok(amount.normalize())
}
