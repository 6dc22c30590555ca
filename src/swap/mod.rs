//! Swap domain: the composite intent and the policies that guard it
//!
//! This module provides:
//! - `SwapIntent`, its status machine and per-leg observations
//! - `SecretVault` for secret generation and gated reveal
//! - `TimelockPolicy` for the source/destination expiry pair
//! - `PartialFillLedger` for liquidity-limited fills

pub mod intent;
pub mod partial_fill;
pub mod secret;
pub mod timelock;

pub use intent::{EscrowLeg, Leg, PendingSubmission, RetryState, SwapIntent, SwapRequest, SwapStatus};
pub use partial_fill::{FillRecommendation, PartialFillLedger, PartialFillRecord};
pub use secret::SecretVault;
pub use timelock::{TimelockPolicy, Timelocks};
