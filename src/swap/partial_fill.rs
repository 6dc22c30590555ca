//! Partial-fill bookkeeping and destination liquidity reservations

use crate::escrow::{AssetRef, ChainId};
use crate::escrow::types::decimal;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Basis points in a whole
pub const BPS: u32 = 10_000;

/// What to do with a request given the available liquidity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillRecommendation {
    ExecuteFull,
    ExecutePartialNowQueueRemainder,
    DeferFullFill,
}

/// Advisory fill decision for one swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFillRecord {
    pub swap_id: Uuid,
    #[serde(with = "decimal")]
    pub requested_amount: u128,
    #[serde(with = "decimal")]
    pub available_amount: u128,
    #[serde(with = "decimal")]
    pub filled_amount: u128,
    #[serde(with = "decimal")]
    pub remainder: u128,
    /// `available / requested`, capped at 10000
    pub fill_bps: u32,
    pub recommendation: FillRecommendation,
}

#[derive(Debug, Clone)]
struct Reservation {
    chain: ChainId,
    asset: AssetRef,
    amount: u128,
}

/// Tracks fill decisions and the destination liquidity they hold
pub struct PartialFillLedger {
    min_fill_bps: u32,
    records: DashMap<Uuid, PartialFillRecord>,
    /// Serializes check-and-reserve across concurrent swaps
    reservations: Mutex<Vec<(Uuid, Reservation)>>,
}

impl PartialFillLedger {
    pub fn new(min_fill_bps: u32) -> Self {
        Self {
            min_fill_bps: min_fill_bps.min(BPS),
            records: DashMap::new(),
            reservations: Mutex::new(Vec::new()),
        }
    }

    /// Pure fill decision for `requested` against `available`
    pub fn evaluate(&self, swap_id: Uuid, requested: u128, available: u128) -> PartialFillRecord {
        let fill_bps = if requested == 0 {
            BPS
        } else if available >= requested {
            BPS
        } else {
            // available < requested, so the quotient is below BPS
            ((available.saturating_mul(BPS as u128)) / requested) as u32
        };

        let (recommendation, filled_amount) = if fill_bps >= BPS {
            (FillRecommendation::ExecuteFull, requested)
        } else if available > 0 && fill_bps >= self.min_fill_bps {
            (FillRecommendation::ExecutePartialNowQueueRemainder, available)
        } else {
            (FillRecommendation::DeferFullFill, 0)
        };

        let record = PartialFillRecord {
            swap_id,
            requested_amount: requested,
            available_amount: available,
            filled_amount,
            remainder: requested - filled_amount,
            fill_bps,
            recommendation,
        };
        self.records.insert(swap_id, record.clone());
        record
    }

    /// Decide the fill against `balance` minus other swaps' reservations, and
    /// reserve the filled amount
    pub async fn plan(
        &self,
        swap_id: Uuid,
        chain: &ChainId,
        asset: &AssetRef,
        balance: u128,
        requested: u128,
    ) -> PartialFillRecord {
        let mut reservations = self.reservations.lock().await;

        let reserved: u128 = reservations
            .iter()
            .filter(|(id, r)| *id != swap_id && r.chain == *chain && r.asset == *asset)
            .map(|(_, r)| r.amount)
            .sum();
        let available = balance.saturating_sub(reserved);

        let record = self.evaluate(swap_id, requested, available);

        reservations.retain(|(id, _)| *id != swap_id);
        if record.filled_amount > 0 {
            reservations.push((
                swap_id,
                Reservation {
                    chain: chain.clone(),
                    asset: asset.clone(),
                    amount: record.filled_amount,
                },
            ));
        }

        record
    }

    /// Re-establish a reservation after restart
    pub async fn restore(&self, swap_id: Uuid, chain: &ChainId, asset: &AssetRef, amount: u128) {
        let mut reservations = self.reservations.lock().await;
        reservations.retain(|(id, _)| *id != swap_id);
        reservations.push((
            swap_id,
            Reservation {
                chain: chain.clone(),
                asset: asset.clone(),
                amount,
            },
        ));
    }

    /// Drop a swap's reservation (destination funded, or swap ended)
    pub async fn release(&self, swap_id: &Uuid) {
        self.reservations.lock().await.retain(|(id, _)| id != swap_id);
    }

    pub async fn reserved(&self, chain: &ChainId, asset: &AssetRef) -> u128 {
        self.reservations
            .lock()
            .await
            .iter()
            .filter(|(_, r)| r.chain == *chain && r.asset == *asset)
            .map(|(_, r)| r.amount)
            .sum()
    }

    pub fn record(&self, swap_id: &Uuid) -> Option<PartialFillRecord> {
        self.records.get(swap_id).map(|r| r.clone())
    }

    pub fn forget(&self, swap_id: &Uuid) {
        self.records.remove(swap_id);
    }
}
