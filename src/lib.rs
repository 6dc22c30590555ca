//! Atomic swap relayer - hashlock/timelock coordination across two chains
//!
//! A swap locks the depositor's asset in a source-chain escrow and the
//! counter-asset in a destination-chain escrow under one secret hash. The
//! relayer creates and funds the legs in order, reveals the secret only once
//! the destination side is safely funded, and refunds through the timelocks
//! when a leg cannot finish.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod escrow;
pub mod events;
pub mod metrics;
pub mod state;
pub mod swap;
pub mod tx;

pub use error::{RelayerError, RelayerResult};
