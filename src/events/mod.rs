//! Escrow event types and parsing
//!
//! Chains deliver raw `ChainEvent` logs (topic plus JSON payload). The parser
//! turns them into the normalized `EscrowEvent` shape the coordinator works with.

pub mod monitor;

pub use monitor::{EventMonitor, SwapNotification};

use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{
    AccountId, AssetRef, ChainId, EscrowId, EscrowValue, LedgerEvent, Secret, SecretHash,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw log entry as emitted by a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub chain_id: ChainId,
    /// Position in the chain's event stream, strictly increasing
    pub sequence: u64,
    pub tx_hash: String,
    pub block_time: u64,
    pub topic: String,
    pub data: serde_json::Value,
}

/// Kinds of escrow events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEventKind {
    Created,
    Funded,
    Completed,
    Cancelled,
}

impl EscrowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowEventKind::Created => "escrow_created",
            EscrowEventKind::Funded => "escrow_funded",
            EscrowEventKind::Completed => "escrow_completed",
            EscrowEventKind::Cancelled => "escrow_cancelled",
        }
    }
}

impl fmt::Display for EscrowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized escrow state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscrowEvent {
    Created {
        escrow_id: EscrowId,
        secret_hash: SecretHash,
        creator: AccountId,
        beneficiary: AccountId,
        asset: AssetRef,
        value: EscrowValue,
        timelock_expiry: u64,
    },
    Funded {
        escrow_id: EscrowId,
    },
    Completed {
        escrow_id: EscrowId,
        secret: Secret,
    },
    Cancelled {
        escrow_id: EscrowId,
        reason: String,
    },
}

impl EscrowEvent {
    pub fn escrow_id(&self) -> EscrowId {
        match self {
            EscrowEvent::Created { escrow_id, .. }
            | EscrowEvent::Funded { escrow_id }
            | EscrowEvent::Completed { escrow_id, .. }
            | EscrowEvent::Cancelled { escrow_id, .. } => *escrow_id,
        }
    }

    pub fn kind(&self) -> EscrowEventKind {
        match self {
            EscrowEvent::Created { .. } => EscrowEventKind::Created,
            EscrowEvent::Funded { .. } => EscrowEventKind::Funded,
            EscrowEvent::Completed { .. } => EscrowEventKind::Completed,
            EscrowEvent::Cancelled { .. } => EscrowEventKind::Cancelled,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use lazy_static::lazy_static;
    use sha3::{Digest, Keccak256};

    fn topic(signature: &str) -> String {
        format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
    }

    lazy_static! {
        pub static ref ESCROW_CREATED: String =
            topic("EscrowCreated(uint64,bytes32,address,address,address,uint256,uint64)");
        pub static ref ESCROW_FUNDED: String = topic("EscrowFunded(uint64,address,uint256)");
        pub static ref ESCROW_COMPLETED: String =
            topic("EscrowCompleted(uint64,address,bytes32)");
        pub static ref ESCROW_CANCELLED: String = topic("EscrowCancelled(uint64,address,string)");
        pub static ref PAUSE_TOGGLED: String = topic("PauseToggled(bool)");
    }

    /// Topic for a ledger event name
    pub fn for_name(name: &str) -> Option<&'static str> {
        match name {
            "EscrowCreated" => Some(ESCROW_CREATED.as_str()),
            "EscrowFunded" => Some(ESCROW_FUNDED.as_str()),
            "EscrowCompleted" => Some(ESCROW_COMPLETED.as_str()),
            "EscrowCancelled" => Some(ESCROW_CANCELLED.as_str()),
            "PauseToggled" => Some(PAUSE_TOGGLED.as_str()),
            _ => None,
        }
    }
}

/// Encode a ledger event as a raw chain log
pub fn encode_ledger_event(
    chain_id: &ChainId,
    sequence: u64,
    tx_hash: String,
    block_time: u64,
    event: &LedgerEvent,
) -> RelayerResult<ChainEvent> {
    let topic = topics::for_name(event.name())
        .ok_or_else(|| RelayerError::EventParsing(format!("No topic for {}", event.name())))?;

    Ok(ChainEvent {
        chain_id: chain_id.clone(),
        sequence,
        tx_hash,
        block_time,
        topic: topic.to_string(),
        data: serde_json::to_value(event)?,
    })
}

/// Event parser for escrow ledger logs
#[derive(Debug, Clone, Default)]
pub struct EventParser;

impl EventParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw log into an escrow event
    ///
    /// Returns `None` for logs that carry no escrow state change (pause toggles,
    /// foreign topics).
    pub fn parse(&self, event: &ChainEvent) -> RelayerResult<Option<EscrowEvent>> {
        let expected = if event.topic == *topics::ESCROW_CREATED {
            "EscrowCreated"
        } else if event.topic == *topics::ESCROW_FUNDED {
            "EscrowFunded"
        } else if event.topic == *topics::ESCROW_COMPLETED {
            "EscrowCompleted"
        } else if event.topic == *topics::ESCROW_CANCELLED {
            "EscrowCancelled"
        } else {
            return Ok(None);
        };

        let ledger_event: LedgerEvent = serde_json::from_value(event.data.clone()).map_err(|e| {
            RelayerError::EventParsing(format!(
                "Bad {} payload at {}#{}: {}",
                expected, event.chain_id, event.sequence, e
            ))
        })?;

        if ledger_event.name() != expected {
            return Err(RelayerError::EventParsing(format!(
                "Topic says {} but payload is {} at {}#{}",
                expected,
                ledger_event.name(),
                event.chain_id,
                event.sequence
            )));
        }

        let parsed = match ledger_event {
            LedgerEvent::EscrowCreated {
                escrow_id,
                secret_hash,
                creator,
                beneficiary,
                asset,
                value,
                timelock_expiry,
            } => EscrowEvent::Created {
                escrow_id,
                secret_hash,
                creator,
                beneficiary,
                asset,
                value,
                timelock_expiry,
            },
            LedgerEvent::EscrowFunded { escrow_id, .. } => EscrowEvent::Funded { escrow_id },
            LedgerEvent::EscrowCompleted {
                escrow_id, secret, ..
            } => EscrowEvent::Completed { escrow_id, secret },
            LedgerEvent::EscrowCancelled {
                escrow_id, reason, ..
            } => EscrowEvent::Cancelled { escrow_id, reason },
            LedgerEvent::PauseToggled { .. } => return Ok(None),
        };

        Ok(Some(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event: &LedgerEvent) -> ChainEvent {
        encode_ledger_event(&ChainId::new("ethereum"), 1, "0xabc".into(), 100, event).unwrap()
    }

    #[test]
    fn test_parse_completed_carries_secret() {
        let secret = Secret([3u8; 32]);
        let event = raw(&LedgerEvent::EscrowCompleted {
            escrow_id: EscrowId(4),
            beneficiary: AccountId::new("bob"),
            secret,
        });

        let parsed = EventParser::new().parse(&event).unwrap();
        assert_eq!(
            parsed,
            Some(EscrowEvent::Completed {
                escrow_id: EscrowId(4),
                secret
            })
        );
    }

    #[test]
    fn test_parse_ignores_pause_and_unknown_topics() {
        let parser = EventParser::new();
        assert_eq!(
            parser.parse(&raw(&LedgerEvent::PauseToggled { paused: true })).unwrap(),
            None
        );

        let mut foreign = raw(&LedgerEvent::PauseToggled { paused: false });
        foreign.topic = "0xdeadbeef".into();
        assert_eq!(parser.parse(&foreign).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_mismatched_payload() {
        let mut event = raw(&LedgerEvent::EscrowFunded {
            escrow_id: EscrowId(1),
            asset: AssetRef::new("USDC"),
            value: EscrowValue::amount(5),
        });
        event.topic = topics::ESCROW_CANCELLED.clone();
        assert!(matches!(
            EventParser::new().parse(&event),
            Err(RelayerError::EventParsing(_))
        ));
    }
}
