//! Swap orchestrator: drives every swap from initiation to a terminal status

use super::planner::{self, Action, ChainTimes};
use super::registry::{SwapHandle, SwapRegistry};
use super::route::{RouteAdvisor, RouteContext, RouteRecommendation, RouteResolver};
use super::scheduler::{Backoff, RetryScheduler};
use crate::chain::{ChainManager, TxIntent, TxKind};
use crate::config::{PartialFillConfig, RelayerConfig, RoutesConfig, Settings, TimelockConfig};
use crate::error::{ErrorKind, RelayerError, RelayerResult};
use crate::escrow::{
    ChainId, CreateEscrow, Escrow, EscrowError, EscrowState, EscrowValue, Secret,
};
use crate::events::{EscrowEvent, SwapNotification};
use crate::state::{SwapEventRecord, SwapStats, SwapStore};
use crate::swap::{
    EscrowLeg, FillRecommendation, Leg, PartialFillLedger, PartialFillRecord, PendingSubmission,
    RetryState, SecretVault, SwapIntent, SwapRequest, SwapStatus, TimelockPolicy,
};
use crate::tx::TransactionSender;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on planner steps per drive, so one call never spins
const MAX_STEPS_PER_DRIVE: usize = 8;

/// How often the retry queue is checked
const RETRY_TICK: Duration = Duration::from_millis(100);

/// Settings the orchestrator reads
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub relayer: RelayerConfig,
    pub timelock: TimelockConfig,
    pub partial_fill: PartialFillConfig,
    pub routes: RoutesConfig,
}

impl From<&Settings> for OrchestratorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            relayer: settings.relayer.clone(),
            timelock: settings.timelock.clone(),
            partial_fill: settings.partial_fill.clone(),
            routes: settings.routes.clone(),
        }
    }
}

/// Cross-chain swap orchestrator
pub struct SwapOrchestrator {
    /// Chain manager for multi-chain access
    chains: Arc<ChainManager>,
    /// Durable swap state
    store: Arc<dyn SwapStore>,
    /// Live swaps and their lookup indexes
    registry: Arc<SwapRegistry>,
    vault: SecretVault,
    policy: TimelockPolicy,
    fills: PartialFillLedger,
    routes: RouteResolver,
    sender: TransactionSender,
    scheduler: RetryScheduler,
    backoff: Backoff,
    config: RelayerConfig,
    queue_ttl_secs: u64,
    /// A sweep is in progress
    sweeping: AtomicBool,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl SwapOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        chains: Arc<ChainManager>,
        store: Arc<dyn SwapStore>,
        advisor: Option<Arc<dyn RouteAdvisor>>,
    ) -> RelayerResult<Self> {
        let policy = TimelockPolicy::new(&config.timelock)?;
        let sender = TransactionSender::new(chains.clone(), &config.relayer);

        Ok(Self {
            chains,
            store,
            registry: Arc::new(SwapRegistry::new()),
            vault: SecretVault::new(),
            policy,
            fills: PartialFillLedger::new(config.partial_fill.min_fill_bps),
            routes: RouteResolver::new(&config.routes, advisor),
            sender,
            scheduler: RetryScheduler::new(),
            backoff: Backoff {
                base: Duration::from_millis(config.relayer.retry_base_delay_ms),
                max: Duration::from_millis(config.relayer.retry_max_delay_ms),
            },
            queue_ttl_secs: config.partial_fill.queue_ttl_secs,
            config: config.relayer,
            sweeping: AtomicBool::new(false),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    pub fn registry(&self) -> Arc<SwapRegistry> {
        self.registry.clone()
    }

    pub fn chains(&self) -> Arc<ChainManager> {
        self.chains.clone()
    }

    pub fn store(&self) -> Arc<dyn SwapStore> {
        self.store.clone()
    }

    /// Reload every unfinished swap from the store
    ///
    /// Secrets and liquidity reservations are restored, and each leg is
    /// re-read from its chain to catch up with anything missed while down.
    pub async fn restore(&self) -> RelayerResult<usize> {
        let active = self.store.load_active().await?;
        let count = active.len();

        for mut intent in active {
            let swap_id = intent.swap_id;
            if let Some(secret) = self.store.load_secret(&swap_id).await? {
                self.vault.restore(swap_id, secret);
            }
            if holds_reservation(intent.status) {
                self.fills
                    .restore(swap_id, &intent.dest.chain, &intent.dest.asset, intent.dest.amount)
                    .await;
            }

            for leg in [Leg::Source, Leg::Dest] {
                if let Err(e) = self.reconcile_leg(&mut intent, leg).await {
                    warn!("Swap {}: could not re-read {} leg: {}", swap_id, leg.as_str(), e);
                }
            }
            if intent.retry.is_some() {
                self.scheduler.schedule(swap_id, Duration::ZERO).await;
            }

            self.persist(&intent).await?;
            self.registry.insert(intent);
            debug!("Restored swap {}", swap_id);
        }

        info!("Restored {} active swaps", count);
        Ok(count)
    }

    /// Accept a swap request
    ///
    /// Validates the request, computes the timelock pair, picks the venue,
    /// checks destination liquidity and, unless the swap is queued, creates
    /// the source escrow. A rejection of that first submission is returned
    /// to the caller.
    pub async fn initiate(&self, request: SwapRequest) -> RelayerResult<SwapIntent> {
        self.validate_request(&request)?;

        let now = self.chain_time(&request.source_chain).await?;
        let duration = request
            .duration_secs
            .unwrap_or_else(|| self.policy.default_duration());
        let timelocks = self.policy.compute(now, duration)?;

        let route = self
            .routes
            .resolve(
                &request.asset,
                request.amount,
                &RouteContext {
                    source_chain: request.source_chain.clone(),
                    dest_chain: request.dest_chain.clone(),
                },
            )
            .await;

        let mut intent = self.new_intent(Uuid::new_v4(), request, route).await?;
        let swap_id = intent.swap_id;
        crate::metrics::record_swap_initiated(&intent.source.chain, &intent.dest.chain);

        let fill = self.plan_fill(&intent).await?;
        match fill.recommendation {
            FillRecommendation::DeferFullFill => {
                intent.status = SwapStatus::Queued;
                intent.queued_until = Some(now + self.queue_ttl_secs);
                info!(
                    "Swap {} queued: {} available of {} requested",
                    swap_id, fill.available_amount, fill.requested_amount
                );
            }
            FillRecommendation::ExecutePartialNowQueueRemainder => {
                intent.timelocks = Some(timelocks);
                self.apply_fill(&mut intent, &fill, now).await?;
            }
            FillRecommendation::ExecuteFull => {
                intent.timelocks = Some(timelocks);
                intent.filled_amount = fill.filled_amount;
            }
        }
        intent.fill = Some(fill);

        self.persist(&intent).await?;
        let handle = self.registry.insert(intent);
        let mut intent = handle.lock().await;

        if intent.status == SwapStatus::Queued {
            return Ok(intent.clone());
        }

        info!(
            "Swap {} initiated: {} {} on {} -> {} on {}",
            swap_id,
            intent.filled_amount,
            intent.source.asset,
            intent.source.chain,
            intent.dest.asset,
            intent.dest.chain
        );

        let times = self.chain_times(&intent).await?;
        match self.execute(&mut intent, &Action::CreateSource, times).await {
            Ok(()) => {
                intent.retry = None;
            }
            Err(e) if e.is_retryable() => {
                self.schedule_retry(&mut intent, Leg::Source, TxKind::Create, &e)
                    .await?;
            }
            Err(e) => {
                self.set_status(&mut intent, SwapStatus::Aborted, &e.to_string())?;
                self.persist(&intent).await?;
                return Err(e);
            }
        }

        self.persist(&intent).await?;
        Ok(intent.clone())
    }

    /// Current record of a swap
    pub async fn status(&self, swap_id: Uuid) -> RelayerResult<SwapIntent> {
        if let Some(handle) = self.registry.get(&swap_id) {
            return Ok(handle.lock().await.clone());
        }
        self.store
            .load_intent(&swap_id)
            .await?
            .ok_or(RelayerError::SwapNotFound(swap_id))
    }

    pub async fn events(&self, swap_id: Uuid) -> RelayerResult<Vec<SwapEventRecord>> {
        self.status(swap_id).await?;
        self.store.list_events(&swap_id).await
    }

    pub async fn stats(&self) -> RelayerResult<SwapStats> {
        self.store.stats().await
    }

    /// Push a swap forward with a known preimage
    ///
    /// The secret must open the swap's hash. A swap parked for an operator
    /// is re-read from both chains and, if the source escrow can still be
    /// completed, completed.
    pub async fn claim(&self, swap_id: Uuid, secret: Secret) -> RelayerResult<SwapIntent> {
        let handle = self.handle(&swap_id)?;
        let mut intent = handle.lock().await;

        if intent.status.is_terminal() {
            return Err(RelayerError::InvalidRequest(format!(
                "swap {} is already {}",
                swap_id, intent.status
            )));
        }
        intent.set_secret(secret)?;
        if !self.vault.holds(&swap_id) {
            self.vault.restore(swap_id, secret);
        }
        info!("Swap {}: claim with a valid secret", swap_id);

        if intent.status.is_parked() {
            for leg in [Leg::Dest, Leg::Source] {
                self.reconcile_leg(&mut intent, leg).await?;
            }
            let times = self.chain_times(&intent).await?;
            let source_open = intent
                .source_expiry()
                .map_or(false, |expiry| times.source < expiry);
            if intent.status.is_parked()
                && intent.source.observed == Some(EscrowState::Funded)
                && source_open
            {
                self.execute(&mut intent, &Action::CompleteSource, times).await?;
            }
        }

        self.persist(&intent).await?;
        self.drive_locked(&mut intent).await?;
        Ok(intent.clone())
    }

    /// Cancel a swap whose source escrow is not yet funded
    pub async fn cancel(&self, swap_id: Uuid) -> RelayerResult<SwapIntent> {
        let handle = self.handle(&swap_id)?;
        let mut intent = handle.lock().await;

        let not_allowed = || RelayerError::CancelNotAllowed {
            swap_id,
            status: intent.status.to_string(),
        };
        if !intent.status.before_source_funding()
            || intent.source.observed >= Some(EscrowState::Funded)
        {
            return Err(not_allowed());
        }

        if let Some(escrow_id) = intent.source.escrow_id {
            if intent.source.observed != Some(EscrowState::Cancelled) {
                let tx = TxIntent::Cancel {
                    sender: intent.source.creator.clone(),
                    escrow_id,
                };
                match self.sender.submit(&intent.source.chain, tx).await {
                    Ok(_) => {}
                    // Funded in the meantime
                    Err(e) if e.escrow_error() == Some(&EscrowError::TimelockNotExpired) => {
                        return Err(not_allowed());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.set_status(&mut intent, SwapStatus::Cancelled, "cancelled by request")?;
        self.persist(&intent).await?;
        Ok(intent.clone())
    }

    /// Fold an escrow event into its swap, then drive the swap
    pub async fn handle_notification(&self, notification: SwapNotification) -> RelayerResult<()> {
        let handle = self.handle(&notification.swap_id)?;
        let mut intent = handle.lock().await;

        let before = intent.status;
        if !intent.apply(&notification.chain, &notification.event) {
            debug!(
                "Swap {}: {} on {} already reflected",
                notification.swap_id,
                notification.event.name(),
                notification.chain
            );
            return Ok(());
        }
        if intent.status != before {
            info!(
                "Swap {}: {} -> {} ({} on {})",
                intent.swap_id,
                before,
                intent.status,
                notification.event.name(),
                notification.chain
            );
        }

        self.persist(&intent).await?;
        self.drive_locked(&mut intent).await
    }

    /// Run whatever the swap needs next
    pub async fn drive(&self, swap_id: Uuid) -> RelayerResult<()> {
        let handle = self.handle(&swap_id)?;
        let mut intent = handle.lock().await;
        self.drive_locked(&mut intent).await
    }

    /// Drive every live swap once
    pub async fn sweep(&self) {
        for swap_id in self.registry.ids() {
            if let Err(e) = self.drive(swap_id).await {
                warn!("Swap {}: sweep failed: {}", swap_id, e);
            }
        }
    }

    /// Main coordination loop
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<SwapNotification>,
    ) -> RelayerResult<()> {
        let mut sweep_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut retry_interval = interval(RETRY_TICK);
        let mut cleanup_interval = interval(Duration::from_secs(60));

        info!("Swap orchestrator started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                // Each notification gets its own task; the per-swap lock orders them
                Some(notification) = notifications.recv() => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        let swap_id = notification.swap_id;
                        if let Err(e) = orchestrator.handle_notification(notification).await {
                            error!("Swap {}: error handling event: {}", swap_id, e);
                        }
                    });
                }

                _ = retry_interval.tick() => {
                    for swap_id in self.scheduler.due().await {
                        let orchestrator = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = orchestrator.drive(swap_id).await {
                                warn!("Swap {}: retry failed: {}", swap_id, e);
                            }
                        });
                    }
                }

                _ = sweep_interval.tick() => {
                    if !self.sweeping.swap(true, Ordering::SeqCst) {
                        let orchestrator = self.clone();
                        tokio::spawn(async move {
                            orchestrator.sweep().await;
                            orchestrator.sweeping.store(false, Ordering::SeqCst);
                        });
                    }
                }

                _ = cleanup_interval.tick() => {
                    let archived = self.registry.archive_finished(self.config.archive_after_secs).await;
                    if !archived.is_empty() {
                        debug!("Archived {} finished swaps", archived.len());
                    }
                }
            }
        }

        info!("Swap orchestrator stopped");
        Ok(())
    }

    /// Stop the orchestrator loop
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Swap orchestrator shutdown initiated");
    }

    fn handle(&self, swap_id: &Uuid) -> RelayerResult<SwapHandle> {
        self.registry
            .get(swap_id)
            .ok_or(RelayerError::SwapNotFound(*swap_id))
    }

    fn validate_request(&self, request: &SwapRequest) -> RelayerResult<()> {
        if request.amount == 0 {
            return Err(RelayerError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        if request.source_chain == request.dest_chain {
            return Err(RelayerError::InvalidRequest(
                "source and destination chains must differ".to_string(),
            ));
        }
        for chain in [&request.source_chain, &request.dest_chain] {
            if !self.chains.contains(chain) {
                return Err(RelayerError::InvalidRequest(format!("unknown chain {}", chain)));
            }
        }
        if request.initiator.is_null() || request.beneficiary.is_null() {
            return Err(RelayerError::InvalidRequest(
                "initiator and beneficiary are required".to_string(),
            ));
        }
        if request.initiator == self.chains.coordinator_account(&request.source_chain)?
            || request.beneficiary == self.chains.coordinator_account(&request.dest_chain)?
        {
            return Err(RelayerError::InvalidRequest(
                "the relayer cannot be a party to its own swap".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a swap record with a fresh secret
    async fn new_intent(
        &self,
        swap_id: Uuid,
        request: SwapRequest,
        route: RouteRecommendation,
    ) -> RelayerResult<SwapIntent> {
        let source_coordinator = self.chains.coordinator_account(&request.source_chain)?;
        let dest_coordinator = self.chains.coordinator_account(&request.dest_chain)?;

        let (secret, secret_hash) = self.vault.generate(swap_id);
        if self.registry.contains_secret(&secret_hash) {
            self.vault.forget(&swap_id);
            return Err(RelayerError::Internal("secret hash collision".to_string()));
        }
        self.store.save_secret(&swap_id, &secret).await?;

        let source = EscrowLeg::new(
            request.source_chain.clone(),
            request.asset.clone(),
            request.initiator.clone(),
            source_coordinator,
            request.amount,
        );
        let dest = EscrowLeg::new(
            request.dest_chain.clone(),
            route.destination_venue.clone(),
            dest_coordinator,
            request.beneficiary.clone(),
            request.amount,
        );

        let mut intent = SwapIntent::new(swap_id, secret_hash, request, source, dest);
        intent.route = Some(route);
        Ok(intent)
    }

    /// Fill decision against the coordinator's destination balance
    async fn plan_fill(&self, intent: &SwapIntent) -> RelayerResult<PartialFillRecord> {
        let balance = self
            .sender
            .balance_of(&intent.dest.chain, &intent.dest.creator, &intent.dest.asset)
            .await?;

        let record = self
            .fills
            .plan(
                intent.swap_id,
                &intent.dest.chain,
                &intent.dest.asset,
                balance,
                intent.requested_amount,
            )
            .await;
        crate::metrics::record_fill_decision(record.recommendation);
        Ok(record)
    }

    /// Shrink both legs to the filled amount and queue the remainder
    async fn apply_fill(
        &self,
        intent: &mut SwapIntent,
        fill: &PartialFillRecord,
        now: u64,
    ) -> RelayerResult<()> {
        intent.filled_amount = fill.filled_amount;
        intent.source.amount = fill.filled_amount;
        intent.dest.amount = fill.filled_amount;

        if fill.remainder == 0 {
            return Ok(());
        }

        let mut request = intent.request.clone();
        request.amount = fill.remainder;
        let route = intent
            .route
            .clone()
            .ok_or_else(|| RelayerError::Internal(format!("swap {} has no route", intent.swap_id)))?;

        let mut child = self.new_intent(Uuid::new_v4(), request, route).await?;
        child.status = SwapStatus::Queued;
        child.parent = Some(intent.swap_id);
        child.queued_until = Some(now + self.queue_ttl_secs);
        intent.remainder = Some(child.swap_id);

        info!(
            "Swap {}: filling {} of {}, remainder {} queued as swap {}",
            intent.swap_id,
            fill.filled_amount,
            fill.requested_amount,
            fill.remainder,
            child.swap_id
        );

        self.persist(&child).await?;
        self.registry.insert(child);
        Ok(())
    }

    /// Re-check liquidity for a queued swap and start it if enough is available
    async fn activate(&self, intent: &mut SwapIntent) -> RelayerResult<()> {
        let now = self.chain_time(&intent.source.chain).await?;
        if intent.queued_until.map_or(false, |until| now >= until) {
            return self.set_status(intent, SwapStatus::Cancelled, "queue TTL elapsed");
        }

        let fill = self.plan_fill(intent).await?;
        if fill.recommendation == FillRecommendation::DeferFullFill {
            intent.fill = Some(fill);
            return Ok(());
        }

        let duration = intent
            .request
            .duration_secs
            .unwrap_or_else(|| self.policy.default_duration());
        match self.policy.compute(now, duration) {
            Ok(timelocks) => intent.timelocks = Some(timelocks),
            Err(e) => return self.set_status(intent, SwapStatus::Aborted, &e.to_string()),
        }

        self.apply_fill(intent, &fill, now).await?;
        intent.fill = Some(fill);
        intent.queued_until = None;
        intent.transition(SwapStatus::Initiated)?;
        info!(
            "Swap {} activated with {} {}",
            intent.swap_id, intent.filled_amount, intent.source.asset
        );
        Ok(())
    }

    async fn drive_locked(&self, intent: &mut SwapIntent) -> RelayerResult<()> {
        for _ in 0..MAX_STEPS_PER_DRIVE {
            if intent.status.is_terminal() {
                break;
            }

            if intent.status == SwapStatus::Queued {
                self.activate(intent).await?;
                self.persist(intent).await?;
                if intent.status == SwapStatus::Queued {
                    break;
                }
                continue;
            }

            let times = self.chain_times(intent).await?;
            let action = planner::next_action(
                intent,
                times,
                &self.policy,
                chrono::Duration::milliseconds(self.config.resubmit_after_ms as i64),
                Utc::now(),
            );

            // Retry bookkeeping only applies to the action that failed
            if let Some(retry) = &intent.retry {
                if action.submission() != Some((retry.leg, retry.kind)) {
                    intent.retry = None;
                } else if Utc::now() < retry.next_attempt_at {
                    break;
                }
            }

            match action {
                Action::Wait => break,

                Action::Transition { to, reason } => {
                    self.set_status(intent, to, &reason)?;
                    self.persist(intent).await?;
                }

                action => {
                    let Some((leg, kind)) = action.submission() else {
                        break;
                    };
                    let result = self.execute(intent, &action, times).await;
                    let stop = match result {
                        Ok(()) => {
                            intent.retry = None;
                            false
                        }
                        Err(e) => self.handle_failure(intent, &action, leg, kind, e).await?,
                    };
                    self.persist(intent).await?;
                    if stop {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Perform one submission
    async fn execute(
        &self,
        intent: &mut SwapIntent,
        action: &Action,
        times: ChainTimes,
    ) -> RelayerResult<()> {
        let swap_id = intent.swap_id;
        let timelocks = intent
            .timelocks
            .ok_or_else(|| RelayerError::Internal(format!("swap {} has no timelocks", swap_id)))?;
        let escrow_of = |leg: &EscrowLeg| {
            leg.escrow_id.ok_or_else(|| {
                RelayerError::Internal(format!("swap {}: {} escrow unknown", swap_id, leg.chain))
            })
        };

        let (leg, tx) = match action {
            Action::CreateSource => (
                Leg::Source,
                TxIntent::Create {
                    sender: intent.source.creator.clone(),
                    params: CreateEscrow {
                        secret_hash: intent.secret_hash,
                        timelock_expiry: timelocks.source_expiry,
                        beneficiary: intent.source.beneficiary.clone(),
                        asset: intent.source.asset.clone(),
                        value: EscrowValue::amount(intent.source.amount),
                    },
                },
            ),

            Action::CreateDest => {
                if intent.source.observed != Some(EscrowState::Funded) {
                    return Err(RelayerError::SafetyViolation(format!(
                        "swap {}: destination escrow before source funding",
                        swap_id
                    )));
                }
                if !self.policy.dest_window_open(&timelocks, times.dest) {
                    return Err(RelayerError::SafetyViolation(format!(
                        "swap {}: destination window closed",
                        swap_id
                    )));
                }
                (
                    Leg::Dest,
                    TxIntent::Create {
                        sender: intent.dest.creator.clone(),
                        params: CreateEscrow {
                            secret_hash: intent.secret_hash,
                            timelock_expiry: timelocks.dest_expiry,
                            beneficiary: intent.dest.beneficiary.clone(),
                            asset: intent.dest.asset.clone(),
                            value: EscrowValue::amount(intent.dest.amount),
                        },
                    },
                )
            }

            Action::FundDest => {
                self.policy
                    .verify(&timelocks)
                    .map_err(|e| RelayerError::SafetyViolation(e.to_string()))?;
                intent.margin_at_dest_funding = Some(timelocks.margin());
                (
                    Leg::Dest,
                    TxIntent::Fund {
                        sender: intent.dest.creator.clone(),
                        escrow_id: escrow_of(&intent.dest)?,
                        value: EscrowValue::amount(intent.dest.amount),
                    },
                )
            }

            Action::RevealAndCompleteDest => {
                if intent.status == SwapStatus::SecretRevealed {
                    self.reconcile_leg(intent, Leg::Dest).await?;
                    if intent.dest.observed == Some(EscrowState::Completed) {
                        return Ok(());
                    }
                }
                let secret = self.vault.reveal(intent, &self.policy, times.dest)?;
                (
                    Leg::Dest,
                    TxIntent::Complete {
                        sender: intent.dest.creator.clone(),
                        escrow_id: escrow_of(&intent.dest)?,
                        secret,
                    },
                )
            }

            Action::CompleteSource => {
                // Never complete twice: check the escrow before (re)submitting
                self.reconcile_leg(intent, Leg::Source).await?;
                if intent.source.observed == Some(EscrowState::Completed) {
                    return Ok(());
                }
                let secret = intent
                    .secret
                    .ok_or(RelayerError::SecretUnavailable(swap_id))?;
                (
                    Leg::Source,
                    TxIntent::Complete {
                        sender: intent.source.beneficiary.clone(),
                        escrow_id: escrow_of(&intent.source)?,
                        secret,
                    },
                )
            }

            Action::CancelDest => (
                Leg::Dest,
                TxIntent::Cancel {
                    sender: intent.dest.creator.clone(),
                    escrow_id: escrow_of(&intent.dest)?,
                },
            ),

            Action::CancelSource => (
                Leg::Source,
                TxIntent::Cancel {
                    sender: intent.source.creator.clone(),
                    escrow_id: escrow_of(&intent.source)?,
                },
            ),

            Action::Wait | Action::Transition { .. } => return Ok(()),
        };

        let kind = tx.kind();
        let chain = intent.leg(leg).chain.clone();
        let receipt = self.sender.submit(&chain, tx).await?;

        let escrow_leg = intent.leg_mut(leg);
        if escrow_leg.escrow_id.is_none() {
            escrow_leg.escrow_id = Some(receipt.escrow_id);
            self.registry.bind_escrow(&chain, receipt.escrow_id, swap_id);
        }
        escrow_leg.pending = Some(PendingSubmission {
            kind,
            tx_hash: Some(receipt.tx_hash.clone()),
            submitted_at: Utc::now(),
        });

        match action {
            // Funds left the coordinator's balance; the reservation no longer applies
            Action::FundDest => self.fills.release(&swap_id).await,
            Action::RevealAndCompleteDest
                if intent.status.can_transition_to(SwapStatus::SecretRevealed) =>
            {
                intent.transition(SwapStatus::SecretRevealed)?;
            }
            _ => {}
        }

        info!(
            "Swap {}: {} {} escrow {} on {} ({})",
            swap_id,
            kind,
            leg.as_str(),
            receipt.escrow_id,
            chain,
            receipt.tx_hash
        );
        Ok(())
    }

    /// React to a failed submission. Returns whether driving should stop for now.
    async fn handle_failure(
        &self,
        intent: &mut SwapIntent,
        action: &Action,
        leg: Leg,
        kind: TxKind,
        err: RelayerError,
    ) -> RelayerResult<bool> {
        let swap_id = intent.swap_id;

        match err.kind() {
            ErrorKind::Transient => {
                self.schedule_retry(intent, leg, kind, &err).await?;
                Ok(true)
            }

            ErrorKind::Validation => {
                // The chain may already show the effect of an earlier attempt
                if self.reconcile_leg(intent, leg).await? {
                    return Ok(false);
                }

                match (action, err.escrow_error()) {
                    (Action::CreateSource | Action::CreateDest, Some(EscrowError::DuplicateSecretHash))
                        if intent
                            .retry
                            .as_ref()
                            .map_or(false, |r| r.leg == leg && r.kind == kind) =>
                    {
                        // An earlier timed-out create landed; wait for its event
                        intent.leg_mut(leg).pending = Some(PendingSubmission {
                            kind,
                            tx_hash: None,
                            submitted_at: Utc::now(),
                        });
                        intent.retry = None;
                        Ok(true)
                    }
                    (_, Some(EscrowError::TimelockNotExpired)) => {
                        self.schedule_retry(intent, leg, kind, &err).await?;
                        Ok(true)
                    }
                    (Action::CreateSource, _) => {
                        self.set_status(intent, SwapStatus::Aborted, &err.to_string())?;
                        Ok(false)
                    }
                    (Action::CreateDest | Action::FundDest | Action::RevealAndCompleteDest, _) => {
                        // Funds are locked on the source side; only the refund path is left
                        self.set_status(intent, SwapStatus::Expired, &err.to_string())?;
                        Ok(false)
                    }
                    _ => {
                        self.set_status(
                            intent,
                            SwapStatus::FailedNeedsManualIntervention,
                            &format!("{} {} rejected: {}", leg.as_str(), kind, err),
                        )?;
                        Ok(true)
                    }
                }
            }

            ErrorKind::Safety => {
                warn!("Swap {}: safety check refused {}: {}", swap_id, kind, err);
                let next = if intent.status.before_source_funding() {
                    SwapStatus::Aborted
                } else {
                    SwapStatus::Expired
                };
                self.set_status(intent, next, &err.to_string())?;
                Ok(false)
            }

            ErrorKind::NotFound | ErrorKind::Unrecoverable | ErrorKind::Internal => {
                self.set_status(
                    intent,
                    SwapStatus::FailedNeedsManualIntervention,
                    &err.to_string(),
                )?;
                Ok(true)
            }
        }
    }

    /// Record a transient failure and schedule the next attempt, or park the
    /// swap once the retry budget is spent
    async fn schedule_retry(
        &self,
        intent: &mut SwapIntent,
        leg: Leg,
        kind: TxKind,
        err: &RelayerError,
    ) -> RelayerResult<()> {
        let attempts = match &intent.retry {
            Some(r) if r.leg == leg && r.kind == kind => r.attempts + 1,
            _ => 1,
        };

        if attempts > self.config.max_retries {
            let exhausted = RelayerError::RetriesExhausted {
                swap_id: intent.swap_id,
                attempts,
            };
            error!("Swap {}: {} ({} {}): {}", intent.swap_id, exhausted, leg.as_str(), kind, err);
            return self.set_status(
                intent,
                SwapStatus::FailedNeedsManualIntervention,
                &format!("{}: {}", exhausted, err),
            );
        }

        let delay = self.backoff.delay(attempts);
        intent.retry = Some(RetryState {
            leg,
            kind,
            attempts,
            last_error: err.to_string(),
            next_attempt_at: Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
        });
        self.scheduler.schedule(intent.swap_id, delay).await;
        crate::metrics::record_retry(&intent.leg(leg).chain, kind);

        warn!(
            "Swap {}: {} {} failed (attempt {}/{}), retrying in {:?}: {}",
            intent.swap_id,
            leg.as_str(),
            kind,
            attempts,
            self.config.max_retries,
            delay,
            err
        );
        Ok(())
    }

    /// Read a leg's escrow from its chain and fold in anything newer.
    /// Returns whether the record changed.
    async fn reconcile_leg(&self, intent: &mut SwapIntent, leg: Leg) -> RelayerResult<bool> {
        let Some(escrow_id) = intent.leg(leg).escrow_id else {
            return Ok(false);
        };
        let chain = intent.leg(leg).chain.clone();

        let escrow = self.sender.read_escrow(&chain, escrow_id).await?;

        let changed = match escrow_as_event(&escrow) {
            Some(event) => intent.apply(&chain, &event),
            None => intent.leg_mut(leg).observe(escrow.state),
        };
        if changed {
            debug!(
                "Swap {}: {} leg read as {} on {}",
                intent.swap_id,
                leg.as_str(),
                escrow.state,
                chain
            );
        }
        Ok(changed)
    }

    fn set_status(&self, intent: &mut SwapIntent, to: SwapStatus, reason: &str) -> RelayerResult<()> {
        let from = intent.status;
        if matches!(
            to,
            SwapStatus::Expired
                | SwapStatus::Aborted
                | SwapStatus::Cancelled
                | SwapStatus::FailedNeedsManualIntervention
        ) {
            intent.failure = Some(reason.to_string());
        }
        intent.transition(to)?;

        match to {
            SwapStatus::FailedNeedsManualIntervention => {
                error!("Swap {}: {} -> {}: {}", intent.swap_id, from, to, reason)
            }
            SwapStatus::Expired | SwapStatus::Aborted => {
                warn!("Swap {}: {} -> {}: {}", intent.swap_id, from, to, reason)
            }
            _ => info!("Swap {}: {} -> {}: {}", intent.swap_id, from, to, reason),
        }
        Ok(())
    }

    /// Save the record and drop in-memory resources it no longer needs
    async fn persist(&self, intent: &SwapIntent) -> RelayerResult<()> {
        if !holds_reservation(intent.status) {
            self.fills.release(&intent.swap_id).await;
        }
        if intent.status.is_terminal() {
            self.vault.forget(&intent.swap_id);
        }
        self.store.save_intent(intent).await
    }

    async fn chain_time(&self, chain: &ChainId) -> RelayerResult<u64> {
        self.sender.current_time(chain).await
    }

    async fn chain_times(&self, intent: &SwapIntent) -> RelayerResult<ChainTimes> {
        Ok(ChainTimes {
            source: self.chain_time(&intent.source.chain).await?,
            dest: self.chain_time(&intent.dest.chain).await?,
        })
    }
}

/// Destination liquidity stays reserved until the destination escrow is funded
fn holds_reservation(status: SwapStatus) -> bool {
    matches!(
        status,
        SwapStatus::Initiated
            | SwapStatus::SourceEscrowCreated
            | SwapStatus::SourceFunded
            | SwapStatus::DestEscrowCreated
    )
}

/// Express an escrow read as the event that would have produced its state
fn escrow_as_event(escrow: &Escrow) -> Option<EscrowEvent> {
    let escrow_id = escrow.id;
    match escrow.state {
        EscrowState::Created => Some(EscrowEvent::Created {
            escrow_id,
            secret_hash: escrow.secret_hash,
            creator: escrow.creator.clone(),
            beneficiary: escrow.beneficiary.clone(),
            asset: escrow.asset.clone(),
            value: escrow.value,
            timelock_expiry: escrow.timelock_expiry,
        }),
        EscrowState::Funded => Some(EscrowEvent::Funded { escrow_id }),
        EscrowState::Completed => escrow
            .secret
            .map(|secret| EscrowEvent::Completed { escrow_id, secret }),
        EscrowState::Cancelled => Some(EscrowEvent::Cancelled {
            escrow_id,
            reason: "observed on read".to_string(),
        }),
    }
}
