//! In-process chain hosting one escrow ledger
//!
//! Used by development mode and by tests. It keeps a full event log so a
//! subscriber can replay from any sequence number, and it can inject
//! transient faults and duplicate deliveries.

use super::{ChainAdapter, ChainError, EscrowFilter, TxIntent, TxReceipt};
use crate::escrow::{
    AccountId, AssetRef, ChainId, Escrow, EscrowError, EscrowId, EscrowLedger, EscrowValue,
    LedgerConfig, LedgerEvent,
};
use crate::events::{encode_ledger_event, ChainEvent};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, warn};

enum Clock {
    System,
    Manual(AtomicU64),
}

impl Clock {
    fn now(&self) -> u64 {
        match self {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            Clock::Manual(t) => t.load(Ordering::SeqCst),
        }
    }
}

struct Inner {
    ledger: EscrowLedger,
    log: Vec<ChainEvent>,
}

/// Local chain adapter
pub struct LocalChain {
    chain_id: ChainId,
    inner: Mutex<Inner>,
    clock: Clock,
    event_tx: broadcast::Sender<ChainEvent>,
    fail_next: AtomicU32,
    duplicate_delivery: AtomicBool,
}

impl LocalChain {
    /// New chain on the system clock
    pub fn new(chain_id: ChainId, config: LedgerConfig) -> Self {
        Self::with_clock(chain_id, config, Clock::System)
    }

    /// New chain whose time only moves through `advance_time` / `set_time`
    pub fn with_manual_clock(chain_id: ChainId, config: LedgerConfig, start: u64) -> Self {
        Self::with_clock(chain_id, config, Clock::Manual(AtomicU64::new(start)))
    }

    fn with_clock(chain_id: ChainId, config: LedgerConfig, clock: Clock) -> Self {
        let (event_tx, _) = broadcast::channel(10000);
        Self {
            chain_id,
            inner: Mutex::new(Inner {
                ledger: EscrowLedger::new(config),
                log: Vec::new(),
            }),
            clock,
            event_tx,
            fail_next: AtomicU32::new(0),
            duplicate_delivery: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Move a manual clock forward. No-op on the system clock.
    pub fn advance_time(&self, secs: u64) {
        if let Clock::Manual(t) = &self.clock {
            t.fetch_add(secs, Ordering::SeqCst);
        }
    }

    pub fn set_time(&self, now: u64) {
        if let Clock::Manual(t) = &self.clock {
            t.store(now, Ordering::SeqCst);
        }
    }

    /// Genesis balance
    pub fn mint(&self, account: &AccountId, asset: &AssetRef, value: EscrowValue) {
        self.inner().ledger.mint(account, asset, value);
    }

    /// Fail the next `n` submissions with `Unavailable`
    pub fn inject_failures(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Deliver every new event twice to live subscribers
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.inner();
        let event = inner.ledger.set_paused(paused);
        self.publish(&mut inner, event);
    }

    pub fn event_count(&self) -> usize {
        self.inner().log.len()
    }

    pub fn balance(&self, account: &AccountId, asset: &AssetRef) -> u128 {
        self.inner().ledger.balance_of(account, asset)
    }

    // The ledger is never left half-updated, so a poisoned lock is still usable
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tx_hash(&self, sequence: u64) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(self.chain_id.as_str().as_bytes());
        hasher.update(sequence.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    /// Append to the log and broadcast. Returns the sequence number.
    fn publish(&self, inner: &mut Inner, event: LedgerEvent) -> u64 {
        let sequence = inner.log.len() as u64 + 1;
        let block_time = self.clock.now();
        let tx_hash = self.tx_hash(sequence);

        let raw = match encode_ledger_event(&self.chain_id, sequence, tx_hash, block_time, &event) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Chain {}: failed to encode {}: {}", self.chain_id, event.name(), e);
                return sequence;
            }
        };

        debug!(
            "Chain {} #{}: {}",
            self.chain_id,
            sequence,
            event.name()
        );

        inner.log.push(raw.clone());
        let copies = if self.duplicate_delivery.load(Ordering::SeqCst) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            // No receivers, that's okay
            let _ = self.event_tx.send(raw.clone());
        }

        sequence
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainAdapter for LocalChain {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    async fn submit(&self, tx: TxIntent) -> Result<TxReceipt, ChainError> {
        if self.take_injected_failure() {
            return Err(ChainError::Unavailable("injected fault".to_string()));
        }

        let now = self.clock.now();
        let mut inner = self.inner();

        let (escrow_id, event) = match tx {
            TxIntent::Create { sender, params } => inner.ledger.create(&sender, now, params)?,
            TxIntent::Fund {
                sender,
                escrow_id,
                value,
            } => (escrow_id, inner.ledger.fund(&sender, now, escrow_id, value)?),
            TxIntent::Complete {
                sender,
                escrow_id,
                secret,
            } => (
                escrow_id,
                inner.ledger.complete(&sender, now, escrow_id, secret)?,
            ),
            TxIntent::Cancel { sender, escrow_id } => {
                (escrow_id, inner.ledger.cancel(&sender, now, escrow_id)?)
            }
        };

        let sequence = self.publish(&mut inner, event);

        Ok(TxReceipt {
            chain_id: self.chain_id.clone(),
            tx_hash: self.tx_hash(sequence),
            escrow_id,
            sequence,
            block_time: now,
        })
    }

    async fn subscribe(
        &self,
        filter: EscrowFilter,
    ) -> Result<BoxStream<'static, ChainEvent>, ChainError> {
        // Hold the lock so nothing is published between the snapshot and the subscription
        let inner = self.inner();
        let backlog: Vec<ChainEvent> = inner
            .log
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let rx = self.event_tx.subscribe();
        drop(inner);

        let chain_id = self.chain_id.clone();
        let live = stream::unfold(rx, move |mut rx| {
            let chain_id = chain_id.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, rx)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Chain {}: subscriber lagged by {} events", chain_id, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .filter(move |e| futures::future::ready(filter.matches(e)));

        Ok(stream::iter(backlog).chain(live).boxed())
    }

    async fn read_escrow(&self, escrow_id: EscrowId) -> Result<Escrow, ChainError> {
        self.inner()
            .ledger
            .escrow(escrow_id)
            .cloned()
            .ok_or(ChainError::Rejected(EscrowError::EscrowNotFound(escrow_id)))
    }

    async fn current_time(&self) -> Result<u64, ChainError> {
        Ok(self.clock.now())
    }

    async fn balance_of(&self, account: &AccountId, asset: &AssetRef) -> Result<u128, ChainError> {
        Ok(self.inner().ledger.balance_of(account, asset))
    }
}
