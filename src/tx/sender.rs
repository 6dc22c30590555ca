//! Transaction sender with a concurrency bound and a per-call timeout
//!
//! Reads the orchestrator makes while holding a swap lock go through here as
//! well, under the same timeout.

use crate::chain::{ChainError, ChainManager, TxIntent, TxReceipt};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{AccountId, AssetRef, ChainId, Escrow, EscrowId};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Submits escrow transactions through the chain adapters
///
/// One attempt per call. Retries are scheduled by the orchestrator, which
/// owns the attempt count for each swap.
pub struct TransactionSender {
    /// Chain manager
    chain_manager: Arc<ChainManager>,
    /// Bounds submissions in flight across all chains
    permits: Semaphore,
    submission_timeout: Duration,
}

impl TransactionSender {
    pub fn new(chain_manager: Arc<ChainManager>, config: &RelayerConfig) -> Self {
        Self {
            chain_manager,
            permits: Semaphore::new(config.max_concurrent_txs.max(1)),
            submission_timeout: Duration::from_millis(config.submission_timeout_ms),
        }
    }

    /// Submit one transaction and wait for its receipt
    pub async fn submit(&self, chain_id: &ChainId, tx: TxIntent) -> RelayerResult<TxReceipt> {
        let adapter = self.chain_manager.get(chain_id)?;
        let kind = tx.kind();

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RelayerError::Internal("submission semaphore closed".to_string()))?;

        debug!("Submitting {} on chain {} as {}", kind, chain_id, tx.sender());
        let started = Instant::now();

        let result = match timeout(self.submission_timeout, adapter.submit(tx)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(receipt) => {
                info!(
                    "Submitted {} on chain {}: escrow {} tx {}",
                    kind, chain_id, receipt.escrow_id, receipt.tx_hash
                );
                crate::metrics::record_submission(chain_id, kind, "ok", elapsed);
                Ok(receipt)
            }
            Err(e) => {
                let outcome = if e.is_transient() { "transient" } else { "rejected" };
                warn!("{} on chain {} failed ({}): {}", kind, chain_id, outcome, e);
                crate::metrics::record_submission(chain_id, kind, outcome, elapsed);
                Err(RelayerError::chain(chain_id, e))
            }
        }
    }

    pub async fn read_escrow(&self, chain_id: &ChainId, escrow_id: EscrowId) -> RelayerResult<Escrow> {
        let adapter = self.chain_manager.get(chain_id)?;
        self.bounded(chain_id, "read_escrow", adapter.read_escrow(escrow_id))
            .await
    }

    pub async fn current_time(&self, chain_id: &ChainId) -> RelayerResult<u64> {
        let adapter = self.chain_manager.get(chain_id)?;
        self.bounded(chain_id, "current_time", adapter.current_time())
            .await
    }

    pub async fn balance_of(
        &self,
        chain_id: &ChainId,
        account: &AccountId,
        asset: &AssetRef,
    ) -> RelayerResult<u128> {
        let adapter = self.chain_manager.get(chain_id)?;
        self.bounded(chain_id, "balance_of", adapter.balance_of(account, asset))
            .await
    }

    async fn bounded<T>(
        &self,
        chain_id: &ChainId,
        call: &str,
        fut: impl Future<Output = Result<T, ChainError>>,
    ) -> RelayerResult<T> {
        let result = match timeout(self.submission_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} on chain {} timed out after {:?}",
                    call, chain_id, self.submission_timeout
                );
                Err(ChainError::Timeout)
            }
        };
        result.map_err(|e| RelayerError::chain(chain_id, e))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAdapter, EscrowFilter, LocalChain};
    use crate::error::ErrorKind;
    use crate::escrow::{
        AccountId, AssetRef, CreateEscrow, Escrow, EscrowError, EscrowId, EscrowValue,
        LedgerConfig, Secret,
    };
    use crate::events::ChainEvent;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    fn create(sender: &str, secret: Secret, expiry: u64) -> TxIntent {
        TxIntent::Create {
            sender: AccountId::new(sender),
            params: CreateEscrow {
                secret_hash: secret.hash(),
                timelock_expiry: expiry,
                beneficiary: AccountId::new("bob"),
                asset: AssetRef::new("USDC"),
                value: EscrowValue::amount(10),
            },
        }
    }

    fn sender_with(adapter: Arc<dyn ChainAdapter>, timeout_ms: u64) -> TransactionSender {
        let manager = Arc::new(ChainManager::new());
        manager.register(adapter, AccountId::new("relayer"));
        TransactionSender::new(
            manager,
            &RelayerConfig {
                submission_timeout_ms: timeout_ms,
                max_concurrent_txs: 2,
                ..RelayerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_rejection_is_classified_as_validation() {
        let chain = Arc::new(LocalChain::with_manual_clock(
            ChainId::new("ethereum"),
            LedgerConfig::default(),
            1_000,
        ));
        let sender = sender_with(chain, 1_000);
        let ethereum = ChainId::new("ethereum");

        tokio_test::assert_ok!(
            sender
                .submit(&ethereum, create("alice", Secret([1u8; 32]), 5_000))
                .await
        );
        let err = sender
            .submit(&ethereum, create("alice", Secret([1u8; 32]), 5_000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.escrow_error(), Some(&EscrowError::DuplicateSecretHash));
        assert_eq!(sender.available_permits(), 2);
    }

    /// Adapter whose every call outlives any sane timeout
    struct Hung(ChainId);

    #[async_trait]
    impl ChainAdapter for Hung {
        fn chain_id(&self) -> &ChainId {
            &self.0
        }
        async fn submit(&self, _tx: TxIntent) -> Result<TxReceipt, ChainError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(ChainError::Unavailable("unreachable".into()))
        }
        async fn subscribe(
            &self,
            _filter: EscrowFilter,
        ) -> Result<BoxStream<'static, ChainEvent>, ChainError> {
            Err(ChainError::Unavailable("no stream".into()))
        }
        async fn read_escrow(&self, escrow_id: EscrowId) -> Result<Escrow, ChainError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(ChainError::Rejected(EscrowError::EscrowNotFound(escrow_id)))
        }
        async fn current_time(&self) -> Result<u64, ChainError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(0)
        }
        async fn balance_of(
            &self,
            _account: &AccountId,
            _asset: &AssetRef,
        ) -> Result<u128, ChainError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_hung_adapter_times_out_as_transient() {
        let sender = sender_with(Arc::new(Hung(ChainId::new("slow"))), 20);
        let err = sender
            .submit(&ChainId::new("slow"), create("alice", Secret([2u8; 32]), 5_000))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "chain_timeout");
    }

    #[tokio::test]
    async fn test_hung_reads_time_out_as_transient() {
        let slow = ChainId::new("slow");
        let sender = sender_with(Arc::new(Hung(slow.clone())), 20);

        let started = Instant::now();
        let errors = [
            sender.current_time(&slow).await.unwrap_err(),
            sender.read_escrow(&slow, EscrowId(1)).await.unwrap_err(),
            sender
                .balance_of(&slow, &AccountId::new("relayer"), &AssetRef::new("USDC"))
                .await
                .unwrap_err(),
        ];
        for err in errors {
            assert!(err.is_retryable());
            assert_eq!(err.code(), "chain_timeout");
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reads_pass_through_to_the_adapter() {
        let ethereum = ChainId::new("ethereum");
        let chain = Arc::new(LocalChain::with_manual_clock(
            ethereum.clone(),
            LedgerConfig::default(),
            1_000,
        ));
        chain.mint(&AccountId::new("relayer"), &AssetRef::new("USDC"), EscrowValue::amount(7));
        let sender = sender_with(chain, 1_000);

        assert_eq!(sender.current_time(&ethereum).await.unwrap(), 1_000);
        assert_eq!(
            sender
                .balance_of(&ethereum, &AccountId::new("relayer"), &AssetRef::new("USDC"))
                .await
                .unwrap(),
            7
        );
        let err = sender.read_escrow(&ethereum, EscrowId(42)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let sender = sender_with(
            Arc::new(LocalChain::new(ChainId::new("ethereum"), LedgerConfig::default())),
            1_000,
        );
        assert!(matches!(
            sender
                .submit(&ChainId::new("solana"), create("alice", Secret([3u8; 32]), 5_000))
                .await,
            Err(RelayerError::ChainNotFound(_))
        ));
    }
}
