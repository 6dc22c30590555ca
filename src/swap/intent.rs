//! Composite swap record linking two escrows that share one secret hash

use super::partial_fill::PartialFillRecord;
use super::timelock::Timelocks;
use crate::chain::TxKind;
use crate::coordination::route::RouteRecommendation;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::types::decimal;
use crate::escrow::{AccountId, AssetRef, ChainId, EscrowId, EscrowState, Secret, SecretHash};
use crate::events::EscrowEvent;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    /// Waiting for destination liquidity; nothing on chain yet
    Queued,
    Initiated,
    SourceEscrowCreated,
    SourceFunded,
    DestEscrowCreated,
    DestFunded,
    SecretRevealed,
    DestCompleted,
    /// Source escrow completed: the swap is done
    Completed,
    Expired,
    RefundPending,
    Refunded,
    /// Cancelled before source funding, or queue TTL elapsed
    Cancelled,
    /// Rejected before any funds moved
    Aborted,
    FailedNeedsManualIntervention,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 15] = [
        SwapStatus::Queued,
        SwapStatus::Initiated,
        SwapStatus::SourceEscrowCreated,
        SwapStatus::SourceFunded,
        SwapStatus::DestEscrowCreated,
        SwapStatus::DestFunded,
        SwapStatus::SecretRevealed,
        SwapStatus::DestCompleted,
        SwapStatus::Completed,
        SwapStatus::Expired,
        SwapStatus::RefundPending,
        SwapStatus::Refunded,
        SwapStatus::Cancelled,
        SwapStatus::Aborted,
        SwapStatus::FailedNeedsManualIntervention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Queued => "QUEUED",
            SwapStatus::Initiated => "INITIATED",
            SwapStatus::SourceEscrowCreated => "SOURCE_ESCROW_CREATED",
            SwapStatus::SourceFunded => "SOURCE_FUNDED",
            SwapStatus::DestEscrowCreated => "DEST_ESCROW_CREATED",
            SwapStatus::DestFunded => "DEST_FUNDED",
            SwapStatus::SecretRevealed => "SECRET_REVEALED",
            SwapStatus::DestCompleted => "DEST_COMPLETED",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Expired => "EXPIRED",
            SwapStatus::RefundPending => "REFUND_PENDING",
            SwapStatus::Refunded => "REFUNDED",
            SwapStatus::Cancelled => "CANCELLED",
            SwapStatus::Aborted => "ABORTED",
            SwapStatus::FailedNeedsManualIntervention => "FAILED_NEEDS_MANUAL_INTERVENTION",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Refunded | SwapStatus::Cancelled | SwapStatus::Aborted
        )
    }

    /// Waiting on an operator; only the timelock refund can move it on its own
    pub fn is_parked(&self) -> bool {
        matches!(self, SwapStatus::FailedNeedsManualIntervention)
    }

    /// No funds locked by the source depositor yet
    pub fn before_source_funding(&self) -> bool {
        matches!(
            self,
            SwapStatus::Queued | SwapStatus::Initiated | SwapStatus::SourceEscrowCreated
        )
    }

    fn happy_rank(&self) -> Option<u8> {
        match self {
            SwapStatus::Initiated => Some(1),
            SwapStatus::SourceEscrowCreated => Some(2),
            SwapStatus::SourceFunded => Some(3),
            SwapStatus::DestEscrowCreated => Some(4),
            SwapStatus::DestFunded => Some(5),
            SwapStatus::SecretRevealed => Some(6),
            SwapStatus::DestCompleted => Some(7),
            SwapStatus::Completed => Some(8),
            _ => None,
        }
    }

    /// Forward-only transition table
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        use SwapStatus::*;

        if *self == next || self.is_terminal() {
            return false;
        }

        if let (Some(from), Some(to)) = (self.happy_rank(), next.happy_rank()) {
            return to > from;
        }

        match (*self, next) {
            (Queued, Initiated | Cancelled | Aborted) => true,
            (Queued, _) => false,
            (Initiated | SourceEscrowCreated, Cancelled | Aborted) => true,
            (from, Expired) if from.happy_rank().is_some() => true,
            (_, FailedNeedsManualIntervention) => true,
            (Expired, RefundPending | Refunded) => true,
            (RefundPending, Refunded) => true,
            // A destination completion observed late still wins over the refund path
            (Expired | RefundPending, DestCompleted | Completed) => true,
            (FailedNeedsManualIntervention, DestCompleted | Completed | Refunded) => true,
            // Funds still locked once the source timelock runs out
            (FailedNeedsManualIntervention, Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which escrow of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Source,
    Dest,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Source => "source",
            Leg::Dest => "dest",
        }
    }
}

/// A submission whose effect has not been observed yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub kind: TxKind,
    pub tx_hash: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// One side of the swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLeg {
    pub chain: ChainId,
    pub asset: AssetRef,
    pub creator: AccountId,
    pub beneficiary: AccountId,
    #[serde(with = "decimal")]
    pub amount: u128,
    pub escrow_id: Option<EscrowId>,
    /// Latest escrow state seen on chain
    pub observed: Option<EscrowState>,
    pub pending: Option<PendingSubmission>,
}

impl EscrowLeg {
    pub fn new(
        chain: ChainId,
        asset: AssetRef,
        creator: AccountId,
        beneficiary: AccountId,
        amount: u128,
    ) -> Self {
        Self {
            chain,
            asset,
            creator,
            beneficiary,
            amount,
            escrow_id: None,
            observed: None,
            pending: None,
        }
    }

    /// Record an observed state. States only move forward and never leave a
    /// terminal state. Returns whether anything changed.
    pub fn observe(&mut self, state: EscrowState) -> bool {
        let moved = match self.observed {
            None => true,
            Some(current) => !current.is_terminal() && state > current,
        };
        if moved {
            self.observed = Some(state);
        }

        let settles = |kind: TxKind| match kind {
            TxKind::Create => true,
            TxKind::Fund => state >= EscrowState::Funded,
            TxKind::Complete => state == EscrowState::Completed,
            TxKind::Cancel => state == EscrowState::Cancelled,
        };
        if self.pending.as_ref().map_or(false, |p| settles(p.kind)) {
            self.pending = None;
        }

        moved
    }

    /// Escrow exists and still holds or awaits funds
    pub fn is_live(&self) -> bool {
        matches!(
            self.observed,
            Some(EscrowState::Created) | Some(EscrowState::Funded)
        )
    }
}

/// Swap request as submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub asset: AssetRef,
    /// Smallest unit of the asset
    #[serde(with = "decimal")]
    pub amount: u128,
    /// Depositor on the source chain
    pub initiator: AccountId,
    /// Recipient on the destination chain
    pub beneficiary: AccountId,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

/// Retry bookkeeping for the action currently being attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub leg: Leg,
    pub kind: TxKind,
    pub attempts: u32,
    pub last_error: String,
    /// Not re-attempted before this
    pub next_attempt_at: DateTime<Utc>,
}

/// The coordinator's record of one logical swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub swap_id: Uuid,
    pub secret_hash: SecretHash,
    pub request: SwapRequest,
    pub route: Option<RouteRecommendation>,
    pub source: EscrowLeg,
    pub dest: EscrowLeg,
    #[serde(with = "decimal")]
    pub requested_amount: u128,
    #[serde(with = "decimal")]
    pub filled_amount: u128,
    pub status: SwapStatus,
    /// Preimage once public; write-once
    pub secret: Option<Secret>,
    pub timelocks: Option<Timelocks>,
    pub fill: Option<PartialFillRecord>,
    /// Swap this one is the queued remainder of
    pub parent: Option<Uuid>,
    pub remainder: Option<Uuid>,
    pub retry: Option<RetryState>,
    pub failure: Option<String>,
    /// Status the swap was in when it was handed to an operator
    #[serde(default)]
    pub parked_from: Option<SwapStatus>,
    /// Timelock margin checked when the destination escrow was funded
    pub margin_at_dest_funding: Option<u64>,
    /// Chain time after which a queued swap is dropped
    pub queued_until: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SwapIntent {
    pub fn new(
        swap_id: Uuid,
        secret_hash: SecretHash,
        request: SwapRequest,
        source: EscrowLeg,
        dest: EscrowLeg,
    ) -> Self {
        let now = Utc::now();
        Self {
            swap_id,
            secret_hash,
            requested_amount: request.amount,
            filled_amount: 0,
            request,
            route: None,
            source,
            dest,
            status: SwapStatus::Initiated,
            secret: None,
            timelocks: None,
            fill: None,
            parent: None,
            remainder: None,
            retry: None,
            failure: None,
            parked_from: None,
            margin_at_dest_funding: None,
            queued_until: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn leg(&self, leg: Leg) -> &EscrowLeg {
        match leg {
            Leg::Source => &self.source,
            Leg::Dest => &self.dest,
        }
    }

    pub fn leg_mut(&mut self, leg: Leg) -> &mut EscrowLeg {
        match leg {
            Leg::Source => &mut self.source,
            Leg::Dest => &mut self.dest,
        }
    }

    /// Which leg lives on `chain`
    pub fn leg_on(&self, chain: &ChainId) -> Option<Leg> {
        if self.source.chain == *chain {
            Some(Leg::Source)
        } else if self.dest.chain == *chain {
            Some(Leg::Dest)
        } else {
            None
        }
    }

    /// Forward-only status change
    pub fn transition(&mut self, next: SwapStatus) -> RelayerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelayerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        debug!("Swap {}: {} -> {}", self.swap_id, self.status, next);
        crate::metrics::record_status_transition(self.status, next);

        if next.is_parked() {
            self.parked_from = Some(self.status);
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
            self.retry = None;
        }
        Ok(())
    }

    /// Record the preimage. It must open this swap's hash, and it never changes once set.
    pub fn set_secret(&mut self, secret: Secret) -> RelayerResult<()> {
        if !secret.matches(&self.secret_hash) {
            return Err(RelayerError::InvalidSecret);
        }
        if self.secret.is_none() {
            self.secret = Some(secret);
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Fold an observed escrow event into the record
    ///
    /// Idempotent: replaying an event already reflected changes nothing.
    pub fn apply(&mut self, chain: &ChainId, event: &EscrowEvent) -> bool {
        let Some(leg) = self.leg_on(chain) else {
            return false;
        };

        let swap_id = self.swap_id;
        let escrow_id = event.escrow_id();
        let escrow_leg = self.leg_mut(leg);
        match escrow_leg.escrow_id {
            Some(known) if known != escrow_id => {
                warn!(
                    "Swap {}: ignoring event for escrow {} on {}, tracking {}",
                    swap_id, escrow_id, chain, known
                );
                return false;
            }
            Some(_) => {}
            None => escrow_leg.escrow_id = Some(escrow_id),
        }

        let state = match event {
            EscrowEvent::Created { .. } => EscrowState::Created,
            EscrowEvent::Funded { .. } => EscrowState::Funded,
            EscrowEvent::Completed { .. } => EscrowState::Completed,
            EscrowEvent::Cancelled { .. } => EscrowState::Cancelled,
        };

        if !escrow_leg.observe(state) {
            return false;
        }

        if let EscrowEvent::Completed { secret, .. } = event {
            if let Err(e) = self.set_secret(*secret) {
                warn!("Swap {}: completion carried a bad secret: {}", self.swap_id, e);
            }
        }

        self.updated_at = Utc::now();
        self.advance_from_observations();
        true
    }

    /// Move the status forward to match what both legs show on chain
    fn advance_from_observations(&mut self) {
        use EscrowState::*;

        let forward = match (self.source.observed, self.dest.observed) {
            (Some(Completed), _) => Some(SwapStatus::Completed),
            (_, Some(Completed)) => Some(SwapStatus::DestCompleted),
            (_, Some(Funded)) => Some(SwapStatus::DestFunded),
            (_, Some(Created)) => Some(SwapStatus::DestEscrowCreated),
            (Some(Funded), _) => Some(SwapStatus::SourceFunded),
            (Some(Created), _) => Some(SwapStatus::SourceEscrowCreated),
            _ => None,
        };
        if let Some(next) = forward {
            if self.status.can_transition_to(next) {
                let _ = self.transition(next);
            }
        }

        if self.source.observed == Some(Cancelled) {
            let next = if self.status.before_source_funding() {
                SwapStatus::Cancelled
            } else {
                SwapStatus::Refunded
            };
            if self.status.can_transition_to(next) {
                let _ = self.transition(next);
            }
        } else if self.dest.observed == Some(Cancelled) && self.status == SwapStatus::Expired {
            let _ = self.transition(SwapStatus::RefundPending);
        }
    }

    pub fn source_expiry(&self) -> Option<u64> {
        self.timelocks.map(|t| t.source_expiry)
    }

    pub fn dest_expiry(&self) -> Option<u64> {
        self.timelocks.map(|t| t.dest_expiry)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
