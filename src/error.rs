//! Error types for the atomic swap relayer

use crate::chain::ChainError;
use crate::escrow::{ChainId, EscrowError};

use thiserror::Error;
use uuid::Uuid;

/// Broad handling class for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, never retried
    Validation,
    /// Infrastructure hiccup, retried with backoff
    Transient,
    /// Would break a swap safety invariant, swap aborted before funds move
    Safety,
    NotFound,
    /// Needs an operator
    Unrecoverable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Safety => "safety",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unrecoverable => "unrecoverable",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain {chain}: {source}")]
    Chain {
        chain: ChainId,
        #[source]
        source: ChainError,
    },

    #[error("Chain {0} not found")]
    ChainNotFound(ChainId),

    #[error("Swap {0} not found")]
    SwapNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timelock margin too small: duration {requested}s, need at least {required}s")]
    InsufficientTimelockMargin { requested: u64, required: u64 },

    #[error("Timelock too long: duration {requested}s exceeds {max}s")]
    TimelockTooLong { requested: u64, max: u64 },

    #[error("Secret reveal refused for swap {swap_id}: {reason}")]
    PrematureReveal { swap_id: Uuid, reason: String },

    #[error("Secret does not match the swap's hash")]
    InvalidSecret,

    #[error("Secret for swap {0} is not held by this relayer")]
    SecretUnavailable(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Swap {swap_id} cannot be cancelled in status {status}")]
    CancelNotAllowed { swap_id: Uuid, status: String },

    #[error("Safety check failed: {0}")]
    SafetyViolation(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Retries exhausted for swap {swap_id} after {attempts} attempts")]
    RetriesExhausted { swap_id: Uuid, attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Wrap an adapter error with the chain it came from
    pub fn chain(chain: &ChainId, source: ChainError) -> Self {
        RelayerError::Chain {
            chain: chain.clone(),
            source,
        }
    }

    /// Classify for retry and HTTP mapping
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayerError::InvalidRequest(_)
            | RelayerError::InsufficientTimelockMargin { .. }
            | RelayerError::TimelockTooLong { .. }
            | RelayerError::InvalidSecret => ErrorKind::Validation,

            RelayerError::Chain { source, .. } => {
                if source.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Validation
                }
            }

            RelayerError::Database(_) | RelayerError::Timeout { .. } => ErrorKind::Transient,

            RelayerError::PrematureReveal { .. }
            | RelayerError::InvalidStateTransition { .. }
            | RelayerError::CancelNotAllowed { .. }
            | RelayerError::SafetyViolation(_) => ErrorKind::Safety,

            RelayerError::SwapNotFound(_)
            | RelayerError::ChainNotFound(_)
            | RelayerError::SecretUnavailable(_) => ErrorKind::NotFound,

            RelayerError::RetriesExhausted { .. } => ErrorKind::Unrecoverable,

            RelayerError::Config(_)
            | RelayerError::Serialization(_)
            | RelayerError::EventParsing(_)
            | RelayerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "config",
            RelayerError::Database(_) => "database",
            RelayerError::Serialization(_) => "serialization",
            RelayerError::Chain { source, .. } => source.code(),
            RelayerError::ChainNotFound(_) => "chain_not_found",
            RelayerError::SwapNotFound(_) => "swap_not_found",
            RelayerError::InvalidRequest(_) => "invalid_request",
            RelayerError::InsufficientTimelockMargin { .. } => "insufficient_timelock_margin",
            RelayerError::TimelockTooLong { .. } => "timelock_too_long",
            RelayerError::PrematureReveal { .. } => "premature_reveal",
            RelayerError::InvalidSecret => "invalid_secret",
            RelayerError::SecretUnavailable(_) => "secret_unavailable",
            RelayerError::InvalidStateTransition { .. } => "invalid_state_transition",
            RelayerError::CancelNotAllowed { .. } => "cancel_not_allowed",
            RelayerError::SafetyViolation(_) => "safety_violation",
            RelayerError::Timeout { .. } => "timeout",
            RelayerError::EventParsing(_) => "event_parsing",
            RelayerError::RetriesExhausted { .. } => "retries_exhausted",
            RelayerError::Internal(_) => "internal",
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// The ledger rejection behind this error, if any
    pub fn escrow_error(&self) -> Option<&EscrowError> {
        match self {
            RelayerError::Chain {
                source: ChainError::Rejected(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
