//! Swap persistence
//!
//! Handles:
//! - Full swap records keyed by swap id
//! - Per-swap event history
//! - Secrets held by this relayer
//! - Per-chain stream checkpoints for restart recovery

mod manager;
mod memory;

pub use manager::PgSwapStore;
pub use memory::MemorySwapStore;

use crate::error::RelayerResult;
use crate::escrow::{ChainId, EscrowId, Secret};
use crate::events::EscrowEvent;
use crate::swap::{SwapIntent, SwapStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One observed event in a swap's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEventRecord {
    pub swap_id: Uuid,
    pub chain_id: ChainId,
    pub escrow_id: EscrowId,
    pub sequence: u64,
    pub tx_hash: String,
    pub event: EscrowEvent,
    pub observed_at: DateTime<Utc>,
}

/// Swap counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapStats {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub refunded: u64,
    pub queued: u64,
    pub needs_manual_intervention: u64,
    pub by_status: BTreeMap<String, u64>,
}

impl SwapStats {
    /// Fill the summary fields from `by_status`
    pub fn from_counts(by_status: BTreeMap<String, u64>) -> Self {
        let count = |s: SwapStatus| by_status.get(s.as_str()).copied().unwrap_or(0);
        let active = SwapStatus::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| count(*s))
            .sum();

        Self {
            total: by_status.values().sum(),
            active,
            completed: count(SwapStatus::Completed),
            refunded: count(SwapStatus::Refunded),
            queued: count(SwapStatus::Queued),
            needs_manual_intervention: count(SwapStatus::FailedNeedsManualIntervention),
            by_status,
        }
    }
}

/// Durable swap state
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Insert or replace the full record
    async fn save_intent(&self, intent: &SwapIntent) -> RelayerResult<()>;

    async fn load_intent(&self, swap_id: &Uuid) -> RelayerResult<Option<SwapIntent>>;

    /// Every swap not in a terminal status
    async fn load_active(&self) -> RelayerResult<Vec<SwapIntent>>;

    async fn append_event(&self, record: &SwapEventRecord) -> RelayerResult<()>;

    /// History of one swap in observation order
    async fn list_events(&self, swap_id: &Uuid) -> RelayerResult<Vec<SwapEventRecord>>;

    async fn save_secret(&self, swap_id: &Uuid, secret: &Secret) -> RelayerResult<()>;

    async fn load_secret(&self, swap_id: &Uuid) -> RelayerResult<Option<Secret>>;

    /// Last fully processed stream sequence for a chain
    async fn save_checkpoint(&self, chain_id: &ChainId, sequence: u64) -> RelayerResult<()>;

    async fn load_checkpoint(&self, chain_id: &ChainId) -> RelayerResult<Option<u64>>;

    async fn stats(&self) -> RelayerResult<SwapStats>;

    async fn health_check(&self) -> RelayerResult<()>;
}
