//! In-memory store for development mode and tests

use super::{SwapEventRecord, SwapStats, SwapStore};
use crate::error::RelayerResult;
use crate::escrow::{ChainId, Secret};
use crate::swap::SwapIntent;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Process-local `SwapStore`. Contents die with the process.
#[derive(Default)]
pub struct MemorySwapStore {
    intents: DashMap<Uuid, SwapIntent>,
    events: DashMap<Uuid, Vec<SwapEventRecord>>,
    secrets: DashMap<Uuid, Secret>,
    checkpoints: DashMap<ChainId, u64>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn save_intent(&self, intent: &SwapIntent) -> RelayerResult<()> {
        self.intents.insert(intent.swap_id, intent.clone());
        Ok(())
    }

    async fn load_intent(&self, swap_id: &Uuid) -> RelayerResult<Option<SwapIntent>> {
        Ok(self.intents.get(swap_id).map(|i| i.clone()))
    }

    async fn load_active(&self) -> RelayerResult<Vec<SwapIntent>> {
        let mut active: Vec<SwapIntent> = self
            .intents
            .iter()
            .filter(|i| i.is_active())
            .map(|i| i.clone())
            .collect();
        active.sort_by_key(|i| i.created_at);
        Ok(active)
    }

    async fn append_event(&self, record: &SwapEventRecord) -> RelayerResult<()> {
        self.events
            .entry(record.swap_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_events(&self, swap_id: &Uuid) -> RelayerResult<Vec<SwapEventRecord>> {
        Ok(self
            .events
            .get(swap_id)
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn save_secret(&self, swap_id: &Uuid, secret: &Secret) -> RelayerResult<()> {
        self.secrets.insert(*swap_id, *secret);
        Ok(())
    }

    async fn load_secret(&self, swap_id: &Uuid) -> RelayerResult<Option<Secret>> {
        Ok(self.secrets.get(swap_id).map(|s| *s))
    }

    async fn save_checkpoint(&self, chain_id: &ChainId, sequence: u64) -> RelayerResult<()> {
        let mut entry = self.checkpoints.entry(chain_id.clone()).or_insert(sequence);
        if *entry < sequence {
            *entry = sequence;
        }
        Ok(())
    }

    async fn load_checkpoint(&self, chain_id: &ChainId) -> RelayerResult<Option<u64>> {
        Ok(self.checkpoints.get(chain_id).map(|s| *s))
    }

    async fn stats(&self) -> RelayerResult<SwapStats> {
        let mut by_status = BTreeMap::new();
        for intent in self.intents.iter() {
            *by_status
                .entry(intent.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(SwapStats::from_counts(by_status))
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::EscrowId;
    use crate::events::EscrowEvent;
    use crate::swap::intent::tests::sample_intent;
    use crate::swap::SwapStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_load_active_skips_terminal_swaps() {
        let store = MemorySwapStore::new();
        let live = sample_intent();
        let mut done = sample_intent();
        done.transition(SwapStatus::Aborted).unwrap();

        store.save_intent(&live).await.unwrap();
        store.save_intent(&done).await.unwrap();

        let active = store.load_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].swap_id, live.swap_id);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_status.get("ABORTED"), Some(&1));
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_back() {
        let store = MemorySwapStore::new();
        let chain = ChainId::new("ethereum");
        assert_eq!(store.load_checkpoint(&chain).await.unwrap(), None);

        store.save_checkpoint(&chain, 7).await.unwrap();
        store.save_checkpoint(&chain, 3).await.unwrap();
        assert_eq!(store.load_checkpoint(&chain).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_events_are_kept_in_order() {
        let store = MemorySwapStore::new();
        let swap_id = Uuid::new_v4();
        for (sequence, event) in [
            (1, EscrowEvent::Funded { escrow_id: EscrowId(1) }),
            (
                2,
                EscrowEvent::Cancelled {
                    escrow_id: EscrowId(1),
                    reason: "Timelock expired".into(),
                },
            ),
        ] {
            store
                .append_event(&SwapEventRecord {
                    swap_id,
                    chain_id: ChainId::new("ethereum"),
                    escrow_id: EscrowId(1),
                    sequence,
                    tx_hash: format!("0x{:02x}", sequence),
                    event,
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let history = store.list_events(&swap_id).await.unwrap();
        assert_eq!(
            history.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(store.list_events(&Uuid::new_v4()).await.unwrap().is_empty());
    }
}
