//! Chain module - the adapter seam between the coordinator and each ledger
//!
//! This module provides:
//! - The `ChainAdapter` capability (submit, subscribe, read escrow state)
//! - Transaction intents and receipts shared by every adapter
//! - `LocalChain`, an in-process ledger host for development and tests
//! - `ChainManager`, the registry of adapters and coordinator accounts

pub mod local;

pub use local::LocalChain;

use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{
    AccountId, AssetRef, ChainId, CreateEscrow, Escrow, EscrowError, EscrowId, EscrowValue,
    LedgerConfig, Secret,
};
use crate::events::ChainEvent;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by a chain adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The ledger refused the call. Retried only while the ledger is paused.
    #[error("Rejected by ledger: {0}")]
    Rejected(#[from] EscrowError),

    #[error("Chain call timed out")]
    Timeout,

    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    #[error("Nonce conflict")]
    NonceConflict,
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Rejected(EscrowError::Paused) => true,
            ChainError::Rejected(_) => false,
            _ => true,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Rejected(e) => e.code(),
            ChainError::Timeout => "chain_timeout",
            ChainError::Unavailable(_) => "chain_unavailable",
            ChainError::NonceConflict => "nonce_conflict",
        }
    }
}

/// Kind of escrow transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Create,
    Fund,
    Complete,
    Cancel,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Create => "create",
            TxKind::Fund => "fund",
            TxKind::Complete => "complete",
            TxKind::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction the coordinator wants a chain to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxIntent {
    Create {
        sender: AccountId,
        params: CreateEscrow,
    },
    Fund {
        sender: AccountId,
        escrow_id: EscrowId,
        value: EscrowValue,
    },
    Complete {
        sender: AccountId,
        escrow_id: EscrowId,
        secret: Secret,
    },
    Cancel {
        sender: AccountId,
        escrow_id: EscrowId,
    },
}

impl TxIntent {
    pub fn kind(&self) -> TxKind {
        match self {
            TxIntent::Create { .. } => TxKind::Create,
            TxIntent::Fund { .. } => TxKind::Fund,
            TxIntent::Complete { .. } => TxKind::Complete,
            TxIntent::Cancel { .. } => TxKind::Cancel,
        }
    }

    pub fn sender(&self) -> &AccountId {
        match self {
            TxIntent::Create { sender, .. }
            | TxIntent::Fund { sender, .. }
            | TxIntent::Complete { sender, .. }
            | TxIntent::Cancel { sender, .. } => sender,
        }
    }
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub chain_id: ChainId,
    pub tx_hash: String,
    pub escrow_id: EscrowId,
    /// Sequence number of the event the transaction emitted
    pub sequence: u64,
    pub block_time: u64,
}

/// Subscription filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscrowFilter {
    /// First sequence number to deliver (inclusive)
    pub from_sequence: u64,
    /// Only these topics; empty means all
    pub topics: Vec<String>,
}

impl EscrowFilter {
    pub fn from_sequence(from_sequence: u64) -> Self {
        Self {
            from_sequence,
            topics: Vec::new(),
        }
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        event.sequence >= self.from_sequence
            && (self.topics.is_empty() || self.topics.iter().any(|t| *t == event.topic))
    }
}

/// Capability the coordinator needs from one chain
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    async fn submit(&self, tx: TxIntent) -> Result<TxReceipt, ChainError>;

    async fn subscribe(
        &self,
        filter: EscrowFilter,
    ) -> Result<BoxStream<'static, ChainEvent>, ChainError>;

    async fn read_escrow(&self, escrow_id: EscrowId) -> Result<Escrow, ChainError>;

    /// Latest block timestamp, unix seconds
    async fn current_time(&self) -> Result<u64, ChainError>;

    async fn balance_of(&self, account: &AccountId, asset: &AssetRef) -> Result<u128, ChainError>;
}

/// Manages the adapters of all configured chains
pub struct ChainManager {
    /// Adapters indexed by chain id
    adapters: DashMap<ChainId, Arc<dyn ChainAdapter>>,
    /// Account the coordinator acts as on each chain
    coordinators: DashMap<ChainId, AccountId>,
}

impl ChainManager {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
            coordinators: DashMap::new(),
        }
    }

    /// Build local chains for every enabled chain in the settings
    pub fn from_settings(settings: &Settings) -> RelayerResult<Self> {
        let manager = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            if chain_config.coordinator_account.is_empty() {
                warn!("Skipping chain {} - no coordinator account configured", name);
                continue;
            }

            info!("Initializing local chain {}", chain_config.chain_id);

            let chain = LocalChain::new(
                ChainId::new(&chain_config.chain_id),
                LedgerConfig {
                    min_timelock_secs: chain_config.min_timelock_secs,
                    max_timelock_secs: chain_config.max_timelock_secs,
                    max_escrows_per_account: chain_config.max_escrows_per_account,
                },
            );

            for genesis in &chain_config.genesis {
                let amount = genesis.amount.parse::<u128>().map_err(|e| {
                    RelayerError::Config(format!(
                        "Invalid genesis amount {:?} on chain {}: {}",
                        genesis.amount, chain_config.chain_id, e
                    ))
                })?;
                chain.mint(
                    &AccountId::new(&genesis.account),
                    &AssetRef::new(&genesis.asset),
                    EscrowValue::amount(amount),
                );
            }

            manager.register(
                Arc::new(chain),
                AccountId::new(&chain_config.coordinator_account),
            );
        }

        Ok(manager)
    }

    /// Register an adapter and the coordinator's account on it
    pub fn register(&self, adapter: Arc<dyn ChainAdapter>, coordinator: AccountId) {
        let chain_id = adapter.chain_id().clone();
        self.coordinators.insert(chain_id.clone(), coordinator);
        self.adapters.insert(chain_id, adapter);
    }

    pub fn get(&self, chain_id: &ChainId) -> RelayerResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain_id)
            .map(|a| a.clone())
            .ok_or_else(|| RelayerError::ChainNotFound(chain_id.clone()))
    }

    pub fn coordinator_account(&self, chain_id: &ChainId) -> RelayerResult<AccountId> {
        self.coordinators
            .get(chain_id)
            .map(|a| a.clone())
            .ok_or_else(|| RelayerError::ChainNotFound(chain_id.clone()))
    }

    pub fn contains(&self, chain_id: &ChainId) -> bool {
        self.adapters.contains_key(chain_id)
    }

    /// All connected chain ids, sorted
    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.adapters.iter().map(|e| e.key().clone()).collect();
        chains.sort();
        chains
    }

    /// Health check for all chains: an adapter is healthy if its clock is readable
    pub async fn health_check(&self) -> Vec<(ChainId, bool)> {
        let mut results = Vec::new();

        for chain_id in self.connected_chains() {
            let healthy = match self.get(&chain_id) {
                Ok(adapter) => adapter.current_time().await.is_ok(),
                Err(_) => false,
            };
            crate::metrics::record_chain_health(&chain_id, healthy);
            results.push((chain_id, healthy));
        }

        results
    }
}

impl Default for ChainManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_resolves_adapters_and_coordinators() {
        let manager = ChainManager::new();
        let chain = Arc::new(LocalChain::new(
            ChainId::new("ethereum"),
            LedgerConfig::default(),
        ));
        manager.register(chain, AccountId::new("relayer-eth"));

        assert!(manager.contains(&ChainId::new("ethereum")));
        assert_eq!(
            manager.coordinator_account(&ChainId::new("ethereum")).unwrap(),
            AccountId::new("relayer-eth")
        );
        assert!(matches!(
            manager.get(&ChainId::new("solana")),
            Err(RelayerError::ChainNotFound(_))
        ));

        let health = manager.health_check().await;
        assert_eq!(health, vec![(ChainId::new("ethereum"), true)]);
    }

    #[test]
    fn test_filter_matches_sequence_and_topic() {
        let event = ChainEvent {
            chain_id: ChainId::new("ethereum"),
            sequence: 5,
            tx_hash: "0x01".into(),
            block_time: 0,
            topic: "a".into(),
            data: serde_json::Value::Null,
        };
        assert!(EscrowFilter::from_sequence(5).matches(&event));
        assert!(!EscrowFilter::from_sequence(6).matches(&event));

        let filter = EscrowFilter {
            from_sequence: 0,
            topics: vec!["b".into()],
        };
        assert!(!filter.matches(&event));
    }
}
