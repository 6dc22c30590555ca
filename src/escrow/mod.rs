//! HTLC escrow primitives
//!
//! This module provides:
//! - Shared identity, secret and value types
//! - The per-chain escrow state machine (`EscrowLedger`)

pub mod ledger;
pub mod types;

pub use ledger::{CreateEscrow, EscrowError, EscrowLedger, LedgerConfig, LedgerEvent};
pub use types::{
    AccountId, AssetRef, ChainId, Escrow, EscrowId, EscrowState, EscrowValue, Secret, SecretHash,
};
