//! Next-step decision for one swap
//!
//! `next_action` is a pure function of the swap record and the two chain
//! clocks. The orchestrator executes whatever it returns, then calls it again
//! after the next observation, retry deadline or sweep.

use crate::chain::TxKind;
use crate::escrow::EscrowState;
use crate::swap::{Leg, SwapIntent, SwapStatus, TimelockPolicy};

use chrono::{DateTime, Duration, Utc};

/// Latest block time on each leg's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTimes {
    pub source: u64,
    pub dest: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until something is observed or time passes
    Wait,
    CreateSource,
    CreateDest,
    FundDest,
    /// Release the secret and complete the destination escrow
    RevealAndCompleteDest,
    CompleteSource,
    CancelDest,
    CancelSource,
    /// Status change with no chain call
    Transition { to: SwapStatus, reason: String },
}

impl Action {
    /// The chain submission this action makes, if any
    pub fn submission(&self) -> Option<(Leg, TxKind)> {
        match self {
            Action::CreateSource => Some((Leg::Source, TxKind::Create)),
            Action::CreateDest => Some((Leg::Dest, TxKind::Create)),
            Action::FundDest => Some((Leg::Dest, TxKind::Fund)),
            Action::RevealAndCompleteDest => Some((Leg::Dest, TxKind::Complete)),
            Action::CompleteSource => Some((Leg::Source, TxKind::Complete)),
            Action::CancelDest => Some((Leg::Dest, TxKind::Cancel)),
            Action::CancelSource => Some((Leg::Source, TxKind::Cancel)),
            Action::Wait | Action::Transition { .. } => None,
        }
    }

    fn transition(to: SwapStatus, reason: &str) -> Self {
        Action::Transition {
            to,
            reason: reason.to_string(),
        }
    }
}

/// Decide what the swap needs next
///
/// A submission whose effect has not been observed is not repeated until
/// `resubmit_after` has passed since it was sent.
pub fn next_action(
    intent: &SwapIntent,
    times: ChainTimes,
    policy: &TimelockPolicy,
    resubmit_after: Duration,
    now: DateTime<Utc>,
) -> Action {
    let action = decide(intent, times, policy);

    if let Some((leg, kind)) = action.submission() {
        if let Some(pending) = &intent.leg(leg).pending {
            if pending.kind == kind && now - pending.submitted_at < resubmit_after {
                return Action::Wait;
            }
        }
    }

    action
}

fn decide(intent: &SwapIntent, times: ChainTimes, policy: &TimelockPolicy) -> Action {
    use EscrowState::*;

    if intent.status.is_terminal() {
        return Action::Wait;
    }
    if intent.status.is_parked() {
        return decide_parked(intent, times);
    }

    // Queued swaps are activated by the orchestrator's liquidity check
    let Some(timelocks) = intent.timelocks else {
        return Action::Wait;
    };
    let source_expired = times.source >= timelocks.source_expiry;
    let dest_expired = times.dest >= timelocks.dest_expiry;

    match intent.status {
        SwapStatus::Queued => Action::Wait,

        SwapStatus::Initiated => {
            if intent.source.escrow_id.is_some() {
                Action::Wait
            } else if source_expired {
                Action::transition(SwapStatus::Aborted, "source timelock elapsed before creation")
            } else {
                Action::CreateSource
            }
        }

        SwapStatus::SourceEscrowCreated => {
            if source_expired {
                Action::transition(SwapStatus::Expired, "source escrow never funded")
            } else {
                Action::Wait
            }
        }

        SwapStatus::SourceFunded => {
            if intent.dest.escrow_id.is_some() {
                Action::Wait
            } else if policy.dest_window_open(&timelocks, times.dest) {
                Action::CreateDest
            } else {
                Action::transition(
                    SwapStatus::Expired,
                    "destination window closed before escrow creation",
                )
            }
        }

        SwapStatus::DestEscrowCreated => {
            if dest_expired {
                Action::transition(SwapStatus::Expired, "destination escrow never funded")
            } else if policy.verify(&timelocks).is_err() {
                Action::transition(SwapStatus::Expired, "timelock margin violated")
            } else {
                Action::FundDest
            }
        }

        SwapStatus::DestFunded | SwapStatus::SecretRevealed => {
            if policy.reveal_allowed(&timelocks, times.dest) {
                Action::RevealAndCompleteDest
            } else {
                Action::transition(SwapStatus::Expired, "destination expired before completion")
            }
        }

        SwapStatus::DestCompleted => {
            if intent.secret.is_none() {
                Action::transition(
                    SwapStatus::FailedNeedsManualIntervention,
                    "destination completed but no secret recorded",
                )
            } else if source_expired {
                Action::transition(
                    SwapStatus::FailedNeedsManualIntervention,
                    "source timelock elapsed before source completion",
                )
            } else {
                Action::CompleteSource
            }
        }

        SwapStatus::Expired => match intent.dest.observed {
            Some(Created) => Action::CancelDest,
            Some(Funded) if dest_expired => Action::CancelDest,
            Some(Funded) => Action::Wait,
            // Created on chain but not yet observed
            None if intent.dest.escrow_id.is_some() => Action::Wait,
            _ => Action::transition(SwapStatus::RefundPending, "destination leg settled"),
        },

        SwapStatus::RefundPending => match intent.source.observed {
            Some(Created) => Action::CancelSource,
            Some(Funded) if source_expired => Action::CancelSource,
            Some(Funded) => Action::Wait,
            None if intent.source.escrow_id.is_some() => Action::Wait,
            None => Action::transition(SwapStatus::Refunded, "no source escrow to refund"),
            Some(Cancelled) => Action::transition(SwapStatus::Refunded, "source escrow cancelled"),
            Some(Completed) => Action::Wait,
        },

        SwapStatus::Completed
        | SwapStatus::Refunded
        | SwapStatus::Cancelled
        | SwapStatus::Aborted
        | SwapStatus::FailedNeedsManualIntervention => Action::Wait,
    }
}

/// A parked swap is left to the operator until the source timelock runs out.
/// After that, and unless either escrow was completed, only the refund path
/// can still return the deposits.
fn decide_parked(intent: &SwapIntent, times: ChainTimes) -> Action {
    let Some(source_expiry) = intent.source_expiry() else {
        return Action::Wait;
    };
    let completing = intent.source.observed == Some(EscrowState::Completed)
        || intent.dest.observed == Some(EscrowState::Completed);
    let refund_failed = matches!(
        intent.parked_from,
        Some(SwapStatus::Expired | SwapStatus::RefundPending)
    );

    if times.source >= source_expiry && !completing && !refund_failed {
        Action::transition(SwapStatus::Expired, "source timelock elapsed while parked")
    } else {
        Action::Wait
    }
}
