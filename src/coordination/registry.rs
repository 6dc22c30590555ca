//! Swap registry: live swaps plus the indexes the event monitor resolves against

use crate::escrow::{ChainId, EscrowId, SecretHash};
use crate::swap::SwapIntent;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Handle to one swap; the mutex gives per-swap exclusivity
pub type SwapHandle = Arc<Mutex<SwapIntent>>;

/// Registry of swaps owned by the orchestrator
pub struct SwapRegistry {
    swaps: DashMap<Uuid, SwapHandle>,
    /// Secret hash -> swap
    by_secret: DashMap<SecretHash, Uuid>,
    /// (chain, escrow) -> swap
    by_escrow: DashMap<(ChainId, EscrowId), Uuid>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        Self {
            swaps: DashMap::new(),
            by_secret: DashMap::new(),
            by_escrow: DashMap::new(),
        }
    }

    /// Track a swap and index its hash and any known escrows
    pub fn insert(&self, intent: SwapIntent) -> SwapHandle {
        let swap_id = intent.swap_id;
        self.by_secret.insert(intent.secret_hash, swap_id);
        for leg in [&intent.source, &intent.dest] {
            if let Some(escrow_id) = leg.escrow_id {
                self.by_escrow.insert((leg.chain.clone(), escrow_id), swap_id);
            }
        }

        let handle = Arc::new(Mutex::new(intent));
        self.swaps.insert(swap_id, handle.clone());
        handle
    }

    pub fn get(&self, swap_id: &Uuid) -> Option<SwapHandle> {
        self.swaps.get(swap_id).map(|h| h.clone())
    }

    pub fn contains_secret(&self, secret_hash: &SecretHash) -> bool {
        self.by_secret.contains_key(secret_hash)
    }

    pub fn lookup_secret(&self, secret_hash: &SecretHash) -> Option<Uuid> {
        self.by_secret.get(secret_hash).map(|id| *id)
    }

    pub fn bind_escrow(&self, chain: &ChainId, escrow_id: EscrowId, swap_id: Uuid) {
        self.by_escrow.insert((chain.clone(), escrow_id), swap_id);
    }

    pub fn lookup_escrow(&self, chain: &ChainId, escrow_id: EscrowId) -> Option<Uuid> {
        self.by_escrow
            .get(&(chain.clone(), escrow_id))
            .map(|id| *id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.swaps.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }

    /// Drop a swap and its index entries
    pub fn remove(&self, swap_id: &Uuid) -> Option<SwapHandle> {
        let (_, handle) = self.swaps.remove(swap_id)?;
        self.by_secret.retain(|_, id| id != swap_id);
        self.by_escrow.retain(|_, id| id != swap_id);
        Some(handle)
    }

    /// Remove terminal swaps finished more than `max_age_secs` ago
    pub async fn archive_finished(&self, max_age_secs: u64) -> Vec<Uuid> {
        let cutoff = Utc::now() - Duration::seconds(max_age_secs as i64);
        let mut archived = Vec::new();

        for swap_id in self.ids() {
            let Some(handle) = self.get(&swap_id) else {
                continue;
            };
            let finished = {
                let intent = handle.lock().await;
                intent.status.is_terminal()
                    && intent.finished_at.map_or(false, |at| at <= cutoff)
            };
            if finished {
                self.remove(&swap_id);
                archived.push(swap_id);
            }
        }

        archived
    }
}

impl Default for SwapRegistry {
    fn default() -> Self {
        Self::new()
    }
}
