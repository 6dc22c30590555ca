//! Transaction submission
//!
//! Bounded, timed submission of escrow transactions with error
//! classification and metrics.

mod sender;

pub use sender::TransactionSender;
