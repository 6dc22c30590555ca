//! End-to-end swaps over two local chains

use super::engine::{OrchestratorConfig, SwapOrchestrator};
use crate::chain::{
    ChainAdapter, ChainError, ChainManager, EscrowFilter, LocalChain, TxIntent, TxReceipt,
};
use crate::config::{RelayerConfig, RoutesConfig};
use crate::error::RelayerError;
use crate::escrow::{
    AccountId, AssetRef, ChainId, CreateEscrow, Escrow, EscrowError, EscrowId, EscrowState,
    EscrowValue, LedgerConfig, Secret,
};
use crate::events::{ChainEvent, EscrowEventKind, EventMonitor};
use crate::state::{MemorySwapStore, SwapStore};
use crate::swap::{SwapIntent, SwapRequest, SwapStatus};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const START: u64 = 1_700_000_000;
const DURATION: u64 = 7200;

fn eth() -> ChainId {
    ChainId::new("ethereum")
}

fn dot() -> ChainId {
    ChainId::new("polkadot")
}

fn account(name: &str) -> AccountId {
    AccountId::new(name)
}

fn usdc() -> AssetRef {
    AssetRef::new("USDC")
}

fn xcusdc() -> AssetRef {
    AssetRef::new("xcUSDC")
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        relayer: RelayerConfig {
            poll_interval_ms: 50,
            max_retries: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            submission_timeout_ms: 1000,
            ..RelayerConfig::default()
        },
        routes: RoutesConfig {
            asset_classes: HashMap::from([("USDC".to_string(), "stablecoin".to_string())]),
            default_venues: HashMap::from([("stablecoin".to_string(), "xcUSDC".to_string())]),
            ..RoutesConfig::default()
        },
        ..OrchestratorConfig::default()
    }
}

fn request(amount: u128) -> SwapRequest {
    SwapRequest {
        source_chain: eth(),
        dest_chain: dot(),
        asset: usdc(),
        amount,
        initiator: account("alice"),
        beneficiary: account("bob"),
        duration_secs: Some(DURATION),
    }
}

fn local_chains(dest_liquidity: u128) -> (Arc<LocalChain>, Arc<LocalChain>) {
    let ethereum = Arc::new(LocalChain::with_manual_clock(eth(), LedgerConfig::default(), START));
    ethereum.mint(&account("alice"), &usdc(), EscrowValue::amount(1_000));

    let polkadot = Arc::new(LocalChain::with_manual_clock(dot(), LedgerConfig::default(), START));
    if dest_liquidity > 0 {
        polkadot.mint(
            &account("relayer-dot"),
            &xcusdc(),
            EscrowValue::amount(dest_liquidity),
        );
    }

    (ethereum, polkadot)
}

fn orchestrator(
    ethereum: &Arc<LocalChain>,
    polkadot: &Arc<LocalChain>,
    store: &Arc<MemorySwapStore>,
) -> Arc<SwapOrchestrator> {
    let chains = Arc::new(ChainManager::new());
    chains.register(ethereum.clone(), account("relayer-eth"));
    chains.register(polkadot.clone(), account("relayer-dot"));

    Arc::new(SwapOrchestrator::new(config(), chains, store.clone(), None).unwrap())
}

struct Harness {
    ethereum: Arc<LocalChain>,
    polkadot: Arc<LocalChain>,
    store: Arc<MemorySwapStore>,
    orchestrator: Arc<SwapOrchestrator>,
    monitor: Arc<EventMonitor>,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    fn new(dest_liquidity: u128) -> Self {
        let (ethereum, polkadot) = local_chains(dest_liquidity);
        let store = Arc::new(MemorySwapStore::new());
        let orchestrator = orchestrator(&ethereum, &polkadot, &store);
        Self::start(ethereum, polkadot, store, orchestrator)
    }

    /// Run the monitor and the orchestrator loop
    fn start(
        ethereum: Arc<LocalChain>,
        polkadot: Arc<LocalChain>,
        store: Arc<MemorySwapStore>,
        orchestrator: Arc<SwapOrchestrator>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let monitor = Arc::new(EventMonitor::new(
            orchestrator.chains(),
            orchestrator.registry(),
            store.clone(),
            tx,
            Duration::from_millis(10),
        ));

        let tasks = vec![
            tokio::spawn({
                let monitor = monitor.clone();
                async move {
                    monitor.run().await.unwrap();
                }
            }),
            tokio::spawn({
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run(rx).await.unwrap();
                }
            }),
        ];

        Self {
            ethereum,
            polkadot,
            store,
            orchestrator,
            monitor,
            tasks,
        }
    }

    async fn shutdown(self) {
        self.monitor.stop().await;
        self.orchestrator.stop().await;
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }

    /// Move both chain clocks forward together
    fn advance(&self, secs: u64) {
        self.ethereum.advance_time(secs);
        self.polkadot.advance_time(secs);
    }

    async fn wait_for(&self, swap_id: Uuid, status: SwapStatus) -> SwapIntent {
        let mut last = None;
        for _ in 0..200 {
            let intent = self.orchestrator.status(swap_id).await.unwrap();
            if intent.status == status {
                return intent;
            }
            last = Some(intent.status);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("swap {} never reached {}, last seen {:?}", swap_id, status, last);
    }

    /// The depositor funds the source escrow the relayer created for them
    async fn fund_source(&self, swap_id: Uuid) {
        let intent = self.wait_for(swap_id, SwapStatus::SourceEscrowCreated).await;
        self.ethereum
            .submit(TxIntent::Fund {
                sender: account("alice"),
                escrow_id: intent.source.escrow_id.unwrap(),
                value: EscrowValue::amount(intent.source.amount),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_full_swap_completes_both_escrows() {
    let h = Harness::new(1_000);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    assert_eq!(intent.dest.asset, xcusdc());
    h.fund_source(intent.swap_id).await;

    let done = h.wait_for(intent.swap_id, SwapStatus::Completed).await;
    assert_eq!(done.source.observed, Some(EscrowState::Completed));
    assert_eq!(done.dest.observed, Some(EscrowState::Completed));

    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 100);
    assert_eq!(h.ethereum.balance(&account("relayer-eth"), &usdc()), 100);
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 900);
    assert_eq!(h.polkadot.balance(&account("relayer-dot"), &xcusdc()), 900);

    // The published preimage opens the swap's hash
    let secret = done.secret.unwrap();
    assert!(secret.matches(&done.secret_hash));

    // Margin held when the destination escrow was funded
    let timelocks = done.timelocks.unwrap();
    let margin = done.margin_at_dest_funding.unwrap();
    assert!(margin > 600);
    assert!(timelocks.dest_expiry < timelocks.source_expiry - 600);

    h.shutdown().await;
}

#[tokio::test]
async fn test_unfunded_destination_refunds_source_after_expiry() {
    let h = Harness::new(100);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.wait_for(intent.swap_id, SwapStatus::SourceEscrowCreated).await;

    // The coordinator's destination liquidity is committed elsewhere
    let elsewhere = h
        .polkadot
        .submit(TxIntent::Create {
            sender: account("relayer-dot"),
            params: CreateEscrow {
                secret_hash: Secret([9u8; 32]).hash(),
                timelock_expiry: START + 3600,
                beneficiary: account("carol"),
                asset: xcusdc(),
                value: EscrowValue::amount(100),
            },
        })
        .await
        .unwrap();
    h.polkadot
        .submit(TxIntent::Fund {
            sender: account("relayer-dot"),
            escrow_id: elsewhere.escrow_id,
            value: EscrowValue::amount(100),
        })
        .await
        .unwrap();

    h.fund_source(intent.swap_id).await;
    let pending = h.wait_for(intent.swap_id, SwapStatus::RefundPending).await;
    assert_eq!(pending.dest.observed, Some(EscrowState::Cancelled));
    assert_eq!(pending.source.observed, Some(EscrowState::Funded));
    assert!(pending.failure.is_some());
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 900);

    // The source escrow only refunds once its own timelock has passed
    h.advance(DURATION + 1);
    let refunded = h.wait_for(intent.swap_id, SwapStatus::Refunded).await;
    assert_eq!(refunded.source.observed, Some(EscrowState::Cancelled));
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 1_000);
    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 0);

    let funded_dest = h
        .store
        .list_events(&intent.swap_id)
        .await
        .unwrap()
        .into_iter()
        .any(|r| r.chain_id == dot() && r.event.kind() == EscrowEventKind::Funded);
    assert!(!funded_dest);

    h.shutdown().await;
}

#[tokio::test]
async fn test_short_duration_is_rejected_without_touching_chains() {
    let h = Harness::new(1_000);

    let mut short = request(100);
    short.duration_secs = Some(1_000);
    let err = h.orchestrator.initiate(short).await.unwrap_err();

    assert!(matches!(err, RelayerError::InsufficientTimelockMargin { .. }));
    assert_eq!(err.code(), "insufficient_timelock_margin");
    assert_eq!(h.ethereum.event_count(), 0);
    assert_eq!(h.polkadot.event_count(), 0);
    assert!(h.orchestrator.registry().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_partial_liquidity_fills_and_queues_remainder() {
    let h = Harness::new(40);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    let fill = intent.fill.clone().unwrap();
    assert_eq!(fill.fill_bps, 4_000);
    assert_eq!(intent.filled_amount, 40);
    assert_eq!(intent.source.amount, 40);

    let child_id = intent.remainder.unwrap();
    let child = h.orchestrator.status(child_id).await.unwrap();
    assert_eq!(child.status, SwapStatus::Queued);
    assert_eq!(child.requested_amount, 60);
    assert_eq!(child.parent, Some(intent.swap_id));
    assert_ne!(child.secret_hash, intent.secret_hash);

    h.fund_source(intent.swap_id).await;
    let funded = h.wait_for(intent.swap_id, SwapStatus::Completed).await;
    let dest_escrow = h
        .polkadot
        .read_escrow(funded.dest.escrow_id.unwrap())
        .await
        .unwrap();
    assert_eq!(dest_escrow.value, EscrowValue::amount(40));
    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 40);

    // No liquidity left for the remainder, so it stays off chain
    let child = h.orchestrator.status(child_id).await.unwrap();
    assert_eq!(child.status, SwapStatus::Queued);
    assert!(child.source.escrow_id.is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn test_second_completion_is_rejected_and_moves_nothing() {
    let h = Harness::new(1_000);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.fund_source(intent.swap_id).await;
    let done = h.wait_for(intent.swap_id, SwapStatus::Completed).await;

    let err = h
        .polkadot
        .submit(TxIntent::Complete {
            sender: account("carol"),
            escrow_id: done.dest.escrow_id.unwrap(),
            secret: done.secret.unwrap(),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChainError::Rejected(EscrowError::InvalidState {
            state: EscrowState::Completed
        })
    );
    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 100);
    assert_eq!(h.polkadot.balance(&account("carol"), &xcusdc()), 0);

    // Claiming a finished swap is refused up front
    assert!(matches!(
        h.orchestrator.claim(intent.swap_id, done.secret.unwrap()).await,
        Err(RelayerError::InvalidRequest(_))
    ));

    h.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let h = Harness::new(1_000);
    h.ethereum.set_duplicate_delivery(true);
    h.polkadot.set_duplicate_delivery(true);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.fund_source(intent.swap_id).await;
    h.wait_for(intent.swap_id, SwapStatus::Completed).await;

    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 100);
    assert_eq!(h.ethereum.balance(&account("relayer-eth"), &usdc()), 100);

    let history = h.store.list_events(&intent.swap_id).await.unwrap();
    let distinct: HashSet<_> = history
        .iter()
        .map(|r| (r.chain_id.clone(), r.escrow_id, r.event.kind()))
        .collect();
    assert_eq!(distinct.len(), history.len());
    // Created, funded and completed on each chain
    assert_eq!(history.len(), 6);

    h.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_park_the_swap() {
    let h = Harness::new(1_000);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.polkadot.inject_failures(100);
    h.fund_source(intent.swap_id).await;

    let parked = h
        .wait_for(intent.swap_id, SwapStatus::FailedNeedsManualIntervention)
        .await;
    assert!(parked.failure.unwrap().contains("Retries exhausted"));
    assert!(parked.dest.escrow_id.is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn test_parked_swap_is_refunded_after_source_expiry() {
    let h = Harness::new(1_000);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.polkadot.inject_failures(100);
    h.fund_source(intent.swap_id).await;
    h.wait_for(intent.swap_id, SwapStatus::FailedNeedsManualIntervention)
        .await;
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 900);

    // Destination back up, but the window for it has gone
    h.polkadot.inject_failures(0);
    h.advance(DURATION + 10);

    let refunded = h.wait_for(intent.swap_id, SwapStatus::Refunded).await;
    assert!(refunded.dest.escrow_id.is_none());
    let escrow = h
        .ethereum
        .read_escrow(refunded.source.escrow_id.unwrap())
        .await
        .unwrap();
    assert_eq!(escrow.state, EscrowState::Cancelled);
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 1_000);

    h.shutdown().await;
}

#[tokio::test]
async fn test_claim_completes_parked_source_escrow() {
    let h = Harness::new(1_000);

    let intent = h.orchestrator.initiate(request(100)).await.unwrap();
    h.fund_source(intent.swap_id).await;
    // Every relayer call left on the source chain is the final completion
    h.ethereum.inject_failures(100);

    let parked = h
        .wait_for(intent.swap_id, SwapStatus::FailedNeedsManualIntervention)
        .await;
    assert_eq!(parked.dest.observed, Some(EscrowState::Completed));
    assert_eq!(parked.source.observed, Some(EscrowState::Funded));
    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 100);
    assert_eq!(h.ethereum.balance(&account("relayer-eth"), &usdc()), 0);

    h.ethereum.inject_failures(0);
    h.orchestrator
        .claim(intent.swap_id, parked.secret.unwrap())
        .await
        .unwrap();

    let done = h.wait_for(intent.swap_id, SwapStatus::Completed).await;
    assert_eq!(done.source.observed, Some(EscrowState::Completed));
    assert_eq!(h.ethereum.balance(&account("relayer-eth"), &usdc()), 100);
    assert_eq!(h.ethereum.balance(&account("alice"), &usdc()), 900);

    h.shutdown().await;
}

/// Chain whose node accepts connections but never answers
struct Unresponsive(ChainId);

#[async_trait]
impl ChainAdapter for Unresponsive {
    fn chain_id(&self) -> &ChainId {
        &self.0
    }
    async fn submit(&self, _tx: TxIntent) -> Result<TxReceipt, ChainError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ChainError::Unavailable("no answer".into()))
    }
    async fn subscribe(
        &self,
        _filter: EscrowFilter,
    ) -> Result<BoxStream<'static, ChainEvent>, ChainError> {
        Err(ChainError::Unavailable("no answer".into()))
    }
    async fn read_escrow(&self, _escrow_id: EscrowId) -> Result<Escrow, ChainError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ChainError::Unavailable("no answer".into()))
    }
    async fn current_time(&self) -> Result<u64, ChainError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ChainError::Unavailable("no answer".into()))
    }
    async fn balance_of(&self, _account: &AccountId, _asset: &AssetRef) -> Result<u128, ChainError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(ChainError::Unavailable("no answer".into()))
    }
}

#[tokio::test]
async fn test_unresponsive_destination_times_out_initiate() {
    let (ethereum, _) = local_chains(0);
    let chains = Arc::new(ChainManager::new());
    chains.register(ethereum.clone(), account("relayer-eth"));
    chains.register(Arc::new(Unresponsive(dot())), account("relayer-dot"));
    let store = Arc::new(MemorySwapStore::new());
    let orchestrator = SwapOrchestrator::new(config(), chains, store, None).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), orchestrator.initiate(request(100)))
        .await
        .expect("initiate returned within the chain timeout")
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code(), "chain_timeout");
    assert!(orchestrator.registry().is_empty());
    assert_eq!(ethereum.event_count(), 0);
}

#[tokio::test]
async fn test_cancel_only_before_source_funding() {
    let h = Harness::new(1_000);

    let first = h.orchestrator.initiate(request(100)).await.unwrap();
    h.wait_for(first.swap_id, SwapStatus::SourceEscrowCreated).await;
    let cancelled = h.orchestrator.cancel(first.swap_id).await.unwrap();
    assert_eq!(cancelled.status, SwapStatus::Cancelled);
    let escrow = h
        .ethereum
        .read_escrow(cancelled.source.escrow_id.unwrap())
        .await
        .unwrap();
    assert_eq!(escrow.state, EscrowState::Cancelled);

    let second = h.orchestrator.initiate(request(100)).await.unwrap();
    h.fund_source(second.swap_id).await;
    h.wait_for(second.swap_id, SwapStatus::Completed).await;
    assert!(matches!(
        h.orchestrator.cancel(second.swap_id).await,
        Err(RelayerError::CancelNotAllowed { .. })
    ));

    h.shutdown().await;
}

#[tokio::test]
async fn test_restart_resumes_in_flight_swap() {
    let (ethereum, polkadot) = local_chains(1_000);
    let store = Arc::new(MemorySwapStore::new());

    // First instance creates the source escrow, then goes away
    let first = orchestrator(&ethereum, &polkadot, &store);
    let intent = first.initiate(request(100)).await.unwrap();
    assert!(intent.source.escrow_id.is_some());
    drop(first);

    let second = orchestrator(&ethereum, &polkadot, &store);
    assert_eq!(second.restore().await.unwrap(), 1);
    let restored = second.status(intent.swap_id).await.unwrap();
    assert_eq!(restored.status, SwapStatus::SourceEscrowCreated);

    let h = Harness::start(ethereum, polkadot, store, second);
    h.fund_source(intent.swap_id).await;
    h.wait_for(intent.swap_id, SwapStatus::Completed).await;
    assert_eq!(h.polkadot.balance(&account("bob"), &xcusdc()), 100);

    h.shutdown().await;
}
