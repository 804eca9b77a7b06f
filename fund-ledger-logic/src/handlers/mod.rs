//! Domain handlers registered with the [`crate::EventDispatcher`].

mod redemption;

pub use redemption::{REDEMPTION_REFERENCE_TYPE, RedemptionApprovalHandler};
