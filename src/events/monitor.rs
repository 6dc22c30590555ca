//! Per-chain event monitor
//!
//! One listener per chain subscribes from the stored checkpoint, normalizes
//! escrow logs, drops duplicates, resolves the owning swap and forwards a
//! notification to the orchestrator.

use super::{ChainEvent, EscrowEvent, EscrowEventKind, EventParser};
use crate::chain::{ChainError, ChainManager, EscrowFilter};
use crate::coordination::SwapRegistry;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{AccountId, AssetRef, ChainId, EscrowId};
use crate::state::{SwapEventRecord, SwapStore};

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a listener waits on an idle stream before re-checking shutdown
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Bound on an escrow read made to resolve an event
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// How often delivery keys of archived swaps are dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// An escrow event attributed to a swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapNotification {
    pub swap_id: Uuid,
    pub chain: ChainId,
    pub escrow_id: EscrowId,
    pub event: EscrowEvent,
    pub sequence: u64,
    pub tx_hash: String,
    pub block_time: u64,
}

/// Watches every connected chain for escrow events
pub struct EventMonitor {
    chains: Arc<ChainManager>,
    registry: Arc<SwapRegistry>,
    store: Arc<dyn SwapStore>,
    parser: EventParser,
    /// (chain, escrow, kind) already stored and forwarded, with its swap
    seen: DashMap<(ChainId, EscrowId, EscrowEventKind), Uuid>,
    notify_tx: mpsc::Sender<SwapNotification>,
    reconnect_delay: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl EventMonitor {
    pub fn new(
        chains: Arc<ChainManager>,
        registry: Arc<SwapRegistry>,
        store: Arc<dyn SwapStore>,
        notify_tx: mpsc::Sender<SwapNotification>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            chains,
            registry,
            store,
            parser: EventParser::new(),
            seen: DashMap::new(),
            notify_tx,
            reconnect_delay,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Listen on every connected chain until stopped
    pub async fn run(self: Arc<Self>) -> RelayerResult<()> {
        let mut handles: Vec<_> = self
            .chains
            .connected_chains()
            .into_iter()
            .map(|chain_id| {
                let monitor = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = monitor.listen(chain_id.clone()).await {
                        error!("Listener for chain {} stopped: {}", chain_id, e);
                    }
                })
            })
            .collect();

        info!("Event monitor started for {} chains", handles.len());
        handles.push(tokio::spawn({
            let monitor = self.clone();
            async move { monitor.prune_loop().await }
        }));
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Listener task failed: {}", e);
            }
        }

        info!("Event monitor stopped");
        Ok(())
    }

    /// Subscription loop for one chain, resubscribing from the checkpoint
    /// whenever the stream ends
    async fn listen(&self, chain_id: ChainId) -> RelayerResult<()> {
        let adapter = self.chains.get(&chain_id)?;

        while !self.is_shutdown().await {
            let from = match self.store.load_checkpoint(&chain_id).await {
                Ok(checkpoint) => checkpoint.map_or(1, |s| s + 1),
                Err(e) => {
                    warn!("Chain {}: failed to load checkpoint: {}", chain_id, e);
                    tokio::time::sleep(self.reconnect_delay).await;
                    continue;
                }
            };

            let mut stream = match adapter.subscribe(EscrowFilter::from_sequence(from)).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Chain {}: subscribe failed: {}", chain_id, e);
                    tokio::time::sleep(self.reconnect_delay).await;
                    continue;
                }
            };
            info!("Chain {}: streaming escrow events from #{}", chain_id, from);

            loop {
                if self.is_shutdown().await {
                    return Ok(());
                }

                let raw = match tokio::time::timeout(IDLE_POLL, stream.next()).await {
                    Err(_) => continue,
                    Ok(None) => {
                        warn!("Chain {}: event stream ended, resubscribing", chain_id);
                        break;
                    }
                    Ok(Some(raw)) => raw,
                };

                match self.process(&raw).await {
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        // Leave the checkpoint behind this event so it is replayed
                        warn!("Chain {} #{}: {}, replaying", chain_id, raw.sequence, e);
                        break;
                    }
                    Err(e) => error!("Chain {} #{}: dropped event: {}", chain_id, raw.sequence, e),
                }

                if let Err(e) = self.store.save_checkpoint(&chain_id, raw.sequence).await {
                    warn!("Chain {}: failed to save checkpoint: {}", chain_id, e);
                }
                crate::metrics::record_checkpoint(&chain_id, raw.sequence);
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }

        Ok(())
    }

    /// Normalize one raw log and forward it if it belongs to a tracked swap
    ///
    /// Returns the notification sent, or `None` for logs that were ignored or
    /// already delivered.
    pub async fn process(&self, raw: &ChainEvent) -> RelayerResult<Option<SwapNotification>> {
        let Some(event) = self.parser.parse(raw)? else {
            return Ok(None);
        };

        let chain = raw.chain_id.clone();
        let key = (chain.clone(), event.escrow_id(), event.kind());
        crate::metrics::record_event(&chain, event.name());

        if self.seen.contains_key(&key) {
            debug!(
                "Chain {}: duplicate {} for escrow {}",
                chain,
                event.name(),
                event.escrow_id()
            );
            crate::metrics::record_duplicate_event(&chain);
            return Ok(None);
        }

        let Some(swap_id) = self.resolve(&chain, &event).await? else {
            debug!(
                "Chain {}: {} for untracked escrow {}",
                chain,
                event.name(),
                event.escrow_id()
            );
            return Ok(None);
        };
        self.registry.bind_escrow(&chain, event.escrow_id(), swap_id);

        let notification = SwapNotification {
            swap_id,
            chain: chain.clone(),
            escrow_id: event.escrow_id(),
            event,
            sequence: raw.sequence,
            tx_hash: raw.tx_hash.clone(),
            block_time: raw.block_time,
        };

        self.store
            .append_event(&SwapEventRecord {
                swap_id,
                chain_id: chain,
                escrow_id: notification.escrow_id,
                sequence: notification.sequence,
                tx_hash: notification.tx_hash.clone(),
                event: notification.event.clone(),
                observed_at: Utc::now(),
            })
            .await?;

        self.notify_tx
            .send(notification.clone())
            .await
            .map_err(|_| RelayerError::Internal("orchestrator channel closed".to_string()))?;

        // Marked only once stored and forwarded, so a failed delivery replays
        self.seen.insert(key, swap_id);
        Ok(Some(notification))
    }

    /// Drop delivery keys of swaps no longer in the registry. Returns how
    /// many were dropped.
    pub fn prune(&self) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, swap_id| self.registry.get(swap_id).is_some());
        before - self.seen.len()
    }

    async fn prune_loop(&self) {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        while !self.is_shutdown().await {
            if tokio::time::timeout(IDLE_POLL, ticker.tick()).await.is_ok() {
                let pruned = self.prune();
                if pruned > 0 {
                    debug!("Dropped {} delivery keys of archived swaps", pruned);
                }
            }
        }
    }

    /// Find the swap an event belongs to
    ///
    /// Unknown escrows are matched by secret hash, and only when the escrow's
    /// parties and asset are the ones the swap expects on that chain.
    async fn resolve(&self, chain: &ChainId, event: &EscrowEvent) -> RelayerResult<Option<Uuid>> {
        let escrow_id = event.escrow_id();
        if let Some(swap_id) = self.registry.lookup_escrow(chain, escrow_id) {
            return Ok(Some(swap_id));
        }

        let (secret_hash, terms) = match event {
            EscrowEvent::Created {
                secret_hash,
                creator,
                beneficiary,
                asset,
                ..
            } => (*secret_hash, (creator.clone(), beneficiary.clone(), asset.clone())),
            _ => {
                // Later-stage event for an escrow we have not indexed yet
                let adapter = self.chains.get(chain)?;
                let escrow = tokio::time::timeout(READ_TIMEOUT, adapter.read_escrow(escrow_id))
                    .await
                    .unwrap_or(Err(ChainError::Timeout))
                    .map_err(|e| RelayerError::chain(chain, e))?;
                (escrow.secret_hash, (escrow.creator, escrow.beneficiary, escrow.asset))
            }
        };

        let Some(swap_id) = self.registry.lookup_secret(&secret_hash) else {
            return Ok(None);
        };
        let Some(handle) = self.registry.get(&swap_id) else {
            return Ok(None);
        };

        let intent = handle.lock().await;
        let Some(leg) = intent.leg_on(chain) else {
            return Ok(None);
        };
        if !leg_terms_match(intent.leg(leg), &terms) {
            warn!(
                "Chain {}: escrow {} reuses the hash of swap {} with different terms",
                chain, escrow_id, swap_id
            );
            return Ok(None);
        }

        Ok(Some(swap_id))
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Event monitor shutdown initiated");
    }

    async fn is_shutdown(&self) -> bool {
        *self.shutdown.read().await
    }
}

fn leg_terms_match(
    leg: &crate::swap::EscrowLeg,
    (creator, beneficiary, asset): &(AccountId, AccountId, AssetRef),
) -> bool {
    leg.creator == *creator && leg.beneficiary == *beneficiary && leg.asset == *asset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAdapter, LocalChain, TxIntent};
    use crate::escrow::{CreateEscrow, EscrowValue, LedgerConfig, Secret};
    use crate::state::{MemorySwapStore, SwapStats};
    use crate::swap::intent::tests::sample_intent;
    use crate::swap::SwapIntent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const START: u64 = 1_000_000;

    struct Fixture {
        chain: Arc<LocalChain>,
        registry: Arc<SwapRegistry>,
        store: Arc<MemorySwapStore>,
        monitor: Arc<EventMonitor>,
        rx: mpsc::Receiver<SwapNotification>,
        swap_id: Uuid,
    }

    /// Memory store whose first event append fails like a pool timeout
    struct FlakyStore {
        inner: Arc<MemorySwapStore>,
        fail_append: AtomicBool,
    }

    #[async_trait]
    impl SwapStore for FlakyStore {
        async fn save_intent(&self, intent: &SwapIntent) -> RelayerResult<()> {
            self.inner.save_intent(intent).await
        }
        async fn load_intent(&self, swap_id: &Uuid) -> RelayerResult<Option<SwapIntent>> {
            self.inner.load_intent(swap_id).await
        }
        async fn load_active(&self) -> RelayerResult<Vec<SwapIntent>> {
            self.inner.load_active().await
        }
        async fn append_event(&self, record: &SwapEventRecord) -> RelayerResult<()> {
            if self.fail_append.swap(false, Ordering::SeqCst) {
                return Err(RelayerError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.append_event(record).await
        }
        async fn list_events(&self, swap_id: &Uuid) -> RelayerResult<Vec<SwapEventRecord>> {
            self.inner.list_events(swap_id).await
        }
        async fn save_secret(&self, swap_id: &Uuid, secret: &Secret) -> RelayerResult<()> {
            self.inner.save_secret(swap_id, secret).await
        }
        async fn load_secret(&self, swap_id: &Uuid) -> RelayerResult<Option<Secret>> {
            self.inner.load_secret(swap_id).await
        }
        async fn save_checkpoint(&self, chain_id: &ChainId, sequence: u64) -> RelayerResult<()> {
            self.inner.save_checkpoint(chain_id, sequence).await
        }
        async fn load_checkpoint(&self, chain_id: &ChainId) -> RelayerResult<Option<u64>> {
            self.inner.load_checkpoint(chain_id).await
        }
        async fn stats(&self) -> RelayerResult<SwapStats> {
            self.inner.stats().await
        }
        async fn health_check(&self) -> RelayerResult<()> {
            self.inner.health_check().await
        }
    }

    fn fixture() -> Fixture {
        fixture_with(false)
    }

    fn fixture_with(fail_first_append: bool) -> Fixture {
        let chain = Arc::new(LocalChain::with_manual_clock(
            ChainId::new("ethereum"),
            LedgerConfig::default(),
            START,
        ));
        let chains = Arc::new(ChainManager::new());
        chains.register(chain.clone(), AccountId::new("relayer-eth"));

        let registry = Arc::new(SwapRegistry::new());
        let intent = sample_intent();
        let swap_id = intent.swap_id;
        registry.insert(intent);

        let store = Arc::new(MemorySwapStore::new());
        let monitor_store: Arc<dyn SwapStore> = if fail_first_append {
            Arc::new(FlakyStore {
                inner: store.clone(),
                fail_append: AtomicBool::new(true),
            })
        } else {
            store.clone()
        };
        let (tx, rx) = mpsc::channel(16);
        let monitor = Arc::new(EventMonitor::new(
            chains,
            registry.clone(),
            monitor_store,
            tx,
            Duration::from_millis(10),
        ));

        Fixture {
            chain,
            registry,
            store,
            monitor,
            rx,
            swap_id,
        }
    }

    fn create_source(creator: &str) -> TxIntent {
        TxIntent::Create {
            sender: AccountId::new(creator),
            params: CreateEscrow {
                secret_hash: Secret([5u8; 32]).hash(),
                timelock_expiry: START + 7200,
                beneficiary: AccountId::new("relayer-eth"),
                asset: AssetRef::new("USDC"),
                value: EscrowValue::amount(100),
            },
        }
    }

    async fn raw_events(chain: &LocalChain) -> Vec<ChainEvent> {
        let stream = chain.subscribe(EscrowFilter::default()).await.unwrap();
        stream.take(chain.event_count()).collect().await
    }

    #[tokio::test]
    async fn test_created_event_resolves_by_secret_hash_once() {
        let mut f = fixture();
        let receipt = f.chain.submit(create_source("alice")).await.unwrap();

        let raw = raw_events(&f.chain).await.remove(0);
        let first = f.monitor.process(&raw).await.unwrap().unwrap();
        assert_eq!(first.swap_id, f.swap_id);
        assert_eq!(
            f.registry.lookup_escrow(&ChainId::new("ethereum"), receipt.escrow_id),
            Some(f.swap_id)
        );
        assert_eq!(f.rx.recv().await.unwrap(), first);

        // Redelivery of the same log is dropped
        assert!(f.monitor.process(&raw).await.unwrap().is_none());
        assert_eq!(f.store.list_events(&f.swap_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_event_for_replay() {
        let mut f = fixture_with(true);
        f.chain.submit(create_source("alice")).await.unwrap();
        let raw = raw_events(&f.chain).await.remove(0);

        let err = f.monitor.process(&raw).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.rx.try_recv().is_err());

        // The replay from the checkpoint is delivered, not dropped as a duplicate
        let replayed = f.monitor.process(&raw).await.unwrap().unwrap();
        assert_eq!(replayed.swap_id, f.swap_id);
        assert_eq!(f.rx.recv().await.unwrap(), replayed);
        assert_eq!(f.store.list_events(&f.swap_id).await.unwrap().len(), 1);

        assert!(f.monitor.process(&raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_drops_keys_of_archived_swaps() {
        let mut f = fixture();
        f.chain.submit(create_source("alice")).await.unwrap();
        let raw = raw_events(&f.chain).await.remove(0);
        f.monitor.process(&raw).await.unwrap().unwrap();
        f.rx.recv().await.unwrap();

        assert_eq!(f.monitor.prune(), 0);
        f.registry.remove(&f.swap_id);
        assert_eq!(f.monitor.prune(), 1);

        // A late redelivery for an archived swap is no longer attributed
        assert!(f.monitor.process(&raw).await.unwrap().is_none());
        assert_eq!(f.monitor.prune(), 0);
    }

    #[tokio::test]
    async fn test_escrow_squatting_on_the_hash_is_ignored() {
        let f = fixture();
        // Same hash, wrong creator
        f.chain.submit(create_source("mallory")).await.unwrap();

        let raw = raw_events(&f.chain).await.remove(0);
        assert!(f.monitor.process(&raw).await.unwrap().is_none());
        assert!(f.store.list_events(&f.swap_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_resumes_after_checkpoint() {
        let mut f = fixture();
        f.chain.mint(
            &AccountId::new("alice"),
            &AssetRef::new("USDC"),
            EscrowValue::amount(100),
        );
        let receipt = f.chain.submit(create_source("alice")).await.unwrap();
        f.chain
            .submit(TxIntent::Fund {
                sender: AccountId::new("alice"),
                escrow_id: receipt.escrow_id,
                value: EscrowValue::amount(100),
            })
            .await
            .unwrap();

        // Creation already processed before a restart
        f.store
            .save_checkpoint(&ChainId::new("ethereum"), 1)
            .await
            .unwrap();
        f.registry
            .bind_escrow(&ChainId::new("ethereum"), receipt.escrow_id, f.swap_id);

        let handle = tokio::spawn(f.monitor.clone().run());
        let notification = tokio::time::timeout(Duration::from_secs(2), f.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.sequence, 2);
        assert!(matches!(notification.event, EscrowEvent::Funded { .. }));

        f.monitor.stop().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            f.store
                .load_checkpoint(&ChainId::new("ethereum"))
                .await
                .unwrap(),
            Some(2)
        );
    }
}
