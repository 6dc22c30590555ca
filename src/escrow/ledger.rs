//! Per-chain HTLC escrow state machine
//!
//! One `EscrowLedger` lives on each chain. It owns escrow records, the
//! secret-hash uniqueness index and asset custody. All calls take the caller
//! identity and the chain time explicitly so the same logic runs on any host.

use super::types::{AccountId, AssetRef, Escrow, EscrowId, EscrowState, EscrowValue, Secret, SecretHash};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors raised by escrow operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("Secret hash is already registered")]
    DuplicateSecretHash,

    #[error("Timelock expiry {expiry} outside allowed window [{min}, {max}]")]
    InvalidTimelock { expiry: u64, min: u64, max: u64 },

    #[error("Beneficiary must differ from creator and not be the null identity")]
    InvalidBeneficiary,

    #[error("Escrow amount must be non-zero")]
    InvalidAmount,

    #[error("Account {account} already holds the maximum of {max} live escrows")]
    TooManyEscrows { account: String, max: usize },

    #[error("Escrow {0} not found")]
    EscrowNotFound(EscrowId),

    #[error("Only the escrow creator may fund it")]
    WrongFunder,

    #[error("Attached value does not match the escrow value")]
    WrongAmount,

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("Escrow is {state}, operation not allowed")]
    InvalidState { state: EscrowState },

    #[error("Secret does not match the escrow hash")]
    InvalidSecret,

    #[error("Timelock has not expired yet")]
    TimelockNotExpired,

    #[error("Timelock has expired")]
    TimelockExpired,

    #[error("Caller is not authorized for this operation")]
    Unauthorized,

    #[error("Ledger is paused")]
    Paused,
}

impl EscrowError {
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::DuplicateSecretHash => "duplicate_secret_hash",
            EscrowError::InvalidTimelock { .. } => "invalid_timelock",
            EscrowError::InvalidBeneficiary => "invalid_beneficiary",
            EscrowError::InvalidAmount => "invalid_amount",
            EscrowError::TooManyEscrows { .. } => "too_many_escrows",
            EscrowError::EscrowNotFound(_) => "escrow_not_found",
            EscrowError::WrongFunder => "wrong_funder",
            EscrowError::WrongAmount => "wrong_amount",
            EscrowError::InsufficientBalance { .. } => "insufficient_balance",
            EscrowError::InvalidState { .. } => "invalid_state",
            EscrowError::InvalidSecret => "invalid_secret",
            EscrowError::TimelockNotExpired => "timelock_not_expired",
            EscrowError::TimelockExpired => "timelock_expired",
            EscrowError::Unauthorized => "unauthorized",
            EscrowError::Paused => "paused",
        }
    }
}

/// Parameters for a new escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEscrow {
    pub secret_hash: SecretHash,
    pub timelock_expiry: u64,
    pub beneficiary: AccountId,
    pub asset: AssetRef,
    pub value: EscrowValue,
}

/// Events emitted by ledger mutations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    EscrowCreated {
        escrow_id: EscrowId,
        secret_hash: SecretHash,
        creator: AccountId,
        beneficiary: AccountId,
        asset: AssetRef,
        value: EscrowValue,
        timelock_expiry: u64,
    },
    EscrowFunded {
        escrow_id: EscrowId,
        asset: AssetRef,
        value: EscrowValue,
    },
    EscrowCompleted {
        escrow_id: EscrowId,
        beneficiary: AccountId,
        secret: Secret,
    },
    EscrowCancelled {
        escrow_id: EscrowId,
        creator: AccountId,
        reason: String,
    },
    PauseToggled {
        paused: bool,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::EscrowCreated { .. } => "EscrowCreated",
            LedgerEvent::EscrowFunded { .. } => "EscrowFunded",
            LedgerEvent::EscrowCompleted { .. } => "EscrowCompleted",
            LedgerEvent::EscrowCancelled { .. } => "EscrowCancelled",
            LedgerEvent::PauseToggled { .. } => "PauseToggled",
        }
    }
}

/// Ledger limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Shortest allowed lock, seconds from now
    pub min_timelock_secs: u64,
    /// Longest allowed lock, seconds from now
    pub max_timelock_secs: u64,
    /// Live (non-terminal) escrows one creator may hold
    pub max_escrows_per_account: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_timelock_secs: 60,
            max_timelock_secs: 7 * 24 * 3600,
            max_escrows_per_account: 1024,
        }
    }
}

/// HTLC escrow ledger for a single chain
#[derive(Debug, Clone)]
pub struct EscrowLedger {
    config: LedgerConfig,
    escrows: BTreeMap<EscrowId, Escrow>,
    by_secret: HashMap<SecretHash, EscrowId>,
    by_creator: HashMap<AccountId, Vec<EscrowId>>,
    by_beneficiary: HashMap<AccountId, Vec<EscrowId>>,
    balances: HashMap<(AccountId, AssetRef), u128>,
    token_owners: HashMap<(AssetRef, u128), AccountId>,
    next_id: u64,
    paused: bool,
}

impl EscrowLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            escrows: BTreeMap::new(),
            by_secret: HashMap::new(),
            by_creator: HashMap::new(),
            by_beneficiary: HashMap::new(),
            balances: HashMap::new(),
            token_owners: HashMap::new(),
            next_id: 1,
            paused: false,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Register a new escrow in `Created` state
    pub fn create(
        &mut self,
        caller: &AccountId,
        now: u64,
        params: CreateEscrow,
    ) -> Result<(EscrowId, LedgerEvent), EscrowError> {
        self.ensure_not_paused()?;

        let min = now.saturating_add(self.config.min_timelock_secs);
        let max = now.saturating_add(self.config.max_timelock_secs);
        if params.timelock_expiry < min || params.timelock_expiry > max {
            return Err(EscrowError::InvalidTimelock {
                expiry: params.timelock_expiry,
                min,
                max,
            });
        }

        if params.beneficiary.is_null() || params.beneficiary == *caller {
            return Err(EscrowError::InvalidBeneficiary);
        }

        if self.by_secret.contains_key(&params.secret_hash) {
            return Err(EscrowError::DuplicateSecretHash);
        }

        if params.value.is_zero_amount() {
            return Err(EscrowError::InvalidAmount);
        }

        let live = self.live_escrow_count(caller);
        if live >= self.config.max_escrows_per_account {
            return Err(EscrowError::TooManyEscrows {
                account: caller.to_string(),
                max: self.config.max_escrows_per_account,
            });
        }

        let escrow_id = EscrowId(self.next_id);
        self.next_id += 1;

        let escrow = Escrow {
            id: escrow_id,
            secret_hash: params.secret_hash,
            creator: caller.clone(),
            beneficiary: params.beneficiary.clone(),
            asset: params.asset.clone(),
            value: params.value,
            timelock_expiry: params.timelock_expiry,
            state: EscrowState::Created,
            created_at: now,
            secret: None,
        };

        self.escrows.insert(escrow_id, escrow);
        self.by_secret.insert(params.secret_hash, escrow_id);
        self.by_creator.entry(caller.clone()).or_default().push(escrow_id);
        self.by_beneficiary
            .entry(params.beneficiary.clone())
            .or_default()
            .push(escrow_id);

        Ok((
            escrow_id,
            LedgerEvent::EscrowCreated {
                escrow_id,
                secret_hash: params.secret_hash,
                creator: caller.clone(),
                beneficiary: params.beneficiary,
                asset: params.asset,
                value: params.value,
                timelock_expiry: params.timelock_expiry,
            },
        ))
    }

    /// Move the creator's assets into custody: `Created -> Funded`
    pub fn fund(
        &mut self,
        caller: &AccountId,
        now: u64,
        escrow_id: EscrowId,
        attached: EscrowValue,
    ) -> Result<LedgerEvent, EscrowError> {
        self.ensure_not_paused()?;

        let escrow = self.get(escrow_id)?;
        if escrow.creator != *caller {
            return Err(EscrowError::WrongFunder);
        }
        if escrow.state != EscrowState::Created {
            return Err(EscrowError::InvalidState { state: escrow.state });
        }
        if now >= escrow.timelock_expiry {
            return Err(EscrowError::TimelockExpired);
        }
        if attached != escrow.value {
            return Err(EscrowError::WrongAmount);
        }

        let asset = escrow.asset.clone();
        let value = escrow.value;
        self.debit(caller, &asset, value)?;

        let escrow = self.get_mut(escrow_id)?;
        escrow.state = EscrowState::Funded;

        Ok(LedgerEvent::EscrowFunded {
            escrow_id,
            asset,
            value,
        })
    }

    /// Release custody to the beneficiary: `Funded -> Completed`
    ///
    /// Open to any caller: holding the preimage is the authorization.
    pub fn complete(
        &mut self,
        _caller: &AccountId,
        now: u64,
        escrow_id: EscrowId,
        secret: Secret,
    ) -> Result<LedgerEvent, EscrowError> {
        self.ensure_not_paused()?;

        let escrow = self.get(escrow_id)?;
        if escrow.state != EscrowState::Funded {
            return Err(EscrowError::InvalidState { state: escrow.state });
        }
        if !secret.matches(&escrow.secret_hash) {
            return Err(EscrowError::InvalidSecret);
        }
        if now >= escrow.timelock_expiry {
            return Err(EscrowError::TimelockExpired);
        }

        let beneficiary = escrow.beneficiary.clone();
        let asset = escrow.asset.clone();
        let value = escrow.value;
        self.credit(&beneficiary, &asset, value);

        let escrow = self.get_mut(escrow_id)?;
        escrow.state = EscrowState::Completed;
        escrow.secret = Some(secret);

        Ok(LedgerEvent::EscrowCompleted {
            escrow_id,
            beneficiary,
            secret,
        })
    }

    /// Creator-only cancellation
    ///
    /// `Created` escrows may be withdrawn at any time and free their secret
    /// hash. `Funded` escrows are refunded once the timelock has expired.
    pub fn cancel(
        &mut self,
        caller: &AccountId,
        now: u64,
        escrow_id: EscrowId,
    ) -> Result<LedgerEvent, EscrowError> {
        self.ensure_not_paused()?;

        let escrow = self.get(escrow_id)?;
        if escrow.creator != *caller {
            return Err(EscrowError::Unauthorized);
        }

        let reason = match escrow.state {
            EscrowState::Created => {
                let secret_hash = escrow.secret_hash;
                self.by_secret.remove(&secret_hash);
                "Cancelled before funding"
            }
            EscrowState::Funded => {
                if now < escrow.timelock_expiry {
                    return Err(EscrowError::TimelockNotExpired);
                }
                let creator = escrow.creator.clone();
                let asset = escrow.asset.clone();
                let value = escrow.value;
                self.credit(&creator, &asset, value);
                "Timelock expired"
            }
            state => return Err(EscrowError::InvalidState { state }),
        };

        let escrow = self.get_mut(escrow_id)?;
        escrow.state = EscrowState::Cancelled;

        Ok(LedgerEvent::EscrowCancelled {
            escrow_id,
            creator: caller.clone(),
            reason: reason.to_string(),
        })
    }

    /// Emergency pause toggle
    pub fn set_paused(&mut self, paused: bool) -> LedgerEvent {
        self.paused = paused;
        LedgerEvent::PauseToggled { paused }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn escrow(&self, escrow_id: EscrowId) -> Option<&Escrow> {
        self.escrows.get(&escrow_id)
    }

    pub fn escrow_by_secret(&self, secret_hash: &SecretHash) -> Option<&Escrow> {
        self.by_secret
            .get(secret_hash)
            .and_then(|id| self.escrows.get(id))
    }

    pub fn escrows_by_creator(&self, creator: &AccountId) -> Vec<EscrowId> {
        self.by_creator.get(creator).cloned().unwrap_or_default()
    }

    pub fn escrows_by_beneficiary(&self, beneficiary: &AccountId) -> Vec<EscrowId> {
        self.by_beneficiary
            .get(beneficiary)
            .cloned()
            .unwrap_or_default()
    }

    /// Seconds left before the escrow becomes cancellable
    pub fn time_remaining(&self, escrow_id: EscrowId, now: u64) -> Option<u64> {
        self.escrows
            .get(&escrow_id)
            .map(|e| e.timelock_expiry.saturating_sub(now))
    }

    pub fn balance_of(&self, account: &AccountId, asset: &AssetRef) -> u128 {
        self.balances
            .get(&(account.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn owner_of(&self, collection: &AssetRef, token_id: u128) -> Option<&AccountId> {
        self.token_owners.get(&(collection.clone(), token_id))
    }

    /// Seed balances (genesis or bridge-in)
    pub fn mint(&mut self, account: &AccountId, asset: &AssetRef, value: EscrowValue) {
        self.credit(account, asset, value);
    }

    fn live_escrow_count(&self, creator: &AccountId) -> usize {
        self.by_creator
            .get(creator)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.escrows.get(id))
                    .filter(|e| !e.state.is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    fn debit(
        &mut self,
        account: &AccountId,
        asset: &AssetRef,
        value: EscrowValue,
    ) -> Result<(), EscrowError> {
        match value {
            EscrowValue::Amount { amount } => {
                let key = (account.clone(), asset.clone());
                let have = self.balances.get(&key).copied().unwrap_or(0);
                if have < amount {
                    return Err(EscrowError::InsufficientBalance {
                        have: have.to_string(),
                        need: amount.to_string(),
                    });
                }
                self.balances.insert(key, have - amount);
            }
            EscrowValue::TokenId { token_id } => {
                let key = (asset.clone(), token_id);
                if self.token_owners.get(&key) != Some(account) {
                    return Err(EscrowError::InsufficientBalance {
                        have: "0".to_string(),
                        need: format!("token {}", token_id),
                    });
                }
                self.token_owners.remove(&key);
            }
        }
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, asset: &AssetRef, value: EscrowValue) {
        match value {
            EscrowValue::Amount { amount } => {
                let balance = self
                    .balances
                    .entry((account.clone(), asset.clone()))
                    .or_insert(0);
                *balance = balance.saturating_add(amount);
            }
            EscrowValue::TokenId { token_id } => {
                self.token_owners
                    .insert((asset.clone(), token_id), account.clone());
            }
        }
    }

    fn ensure_not_paused(&self) -> Result<(), EscrowError> {
        if self.paused {
            Err(EscrowError::Paused)
        } else {
            Ok(())
        }
    }

    fn get(&self, escrow_id: EscrowId) -> Result<&Escrow, EscrowError> {
        self.escrows
            .get(&escrow_id)
            .ok_or(EscrowError::EscrowNotFound(escrow_id))
    }

    fn get_mut(&mut self, escrow_id: EscrowId) -> Result<&mut Escrow, EscrowError> {
        self.escrows
            .get_mut(&escrow_id)
            .ok_or(EscrowError::EscrowNotFound(escrow_id))
    }
}

impl Default for EscrowLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    fn usdc() -> AssetRef {
        AssetRef::new("USDC")
    }

    fn secret() -> Secret {
        Secret([42u8; 32])
    }

    fn funded_ledger() -> EscrowLedger {
        let mut ledger = EscrowLedger::default();
        ledger.mint(&alice(), &usdc(), EscrowValue::amount(1_000));
        ledger
    }

    fn params(expiry: u64) -> CreateEscrow {
        CreateEscrow {
            secret_hash: secret().hash(),
            timelock_expiry: expiry,
            beneficiary: bob(),
            asset: usdc(),
            value: EscrowValue::amount(100),
        }
    }

    fn create_and_fund(ledger: &mut EscrowLedger) -> EscrowId {
        let (id, _) = ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();
        ledger
            .fund(&alice(), NOW + 1, id, EscrowValue::amount(100))
            .unwrap();
        id
    }

    #[test]
    fn test_create_rejects_timelock_outside_window() {
        let mut ledger = funded_ledger();
        let too_short = ledger.create(&alice(), NOW, params(NOW + 10));
        assert!(matches!(too_short, Err(EscrowError::InvalidTimelock { .. })));

        let too_long = ledger.create(&alice(), NOW, params(NOW + 30 * 24 * 3600));
        assert!(matches!(too_long, Err(EscrowError::InvalidTimelock { .. })));
    }

    #[test]
    fn test_create_rejects_bad_beneficiary() {
        let mut ledger = funded_ledger();
        let mut self_pay = params(NOW + 3600);
        self_pay.beneficiary = alice();
        assert_eq!(
            ledger.create(&alice(), NOW, self_pay),
            Err(EscrowError::InvalidBeneficiary)
        );

        let mut null = params(NOW + 3600);
        null.beneficiary = AccountId::new("0x0000000000000000000000000000000000000000");
        assert_eq!(
            ledger.create(&alice(), NOW, null),
            Err(EscrowError::InvalidBeneficiary)
        );
    }

    #[test]
    fn test_create_rejects_duplicate_secret_hash_and_zero_amount() {
        let mut ledger = funded_ledger();
        ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();
        assert_eq!(
            ledger.create(&alice(), NOW, params(NOW + 3600)).map(|_| ()),
            Err(EscrowError::DuplicateSecretHash)
        );

        let mut zero = params(NOW + 3600);
        zero.secret_hash = Secret([1u8; 32]).hash();
        zero.value = EscrowValue::amount(0);
        assert_eq!(
            ledger.create(&alice(), NOW, zero).map(|_| ()),
            Err(EscrowError::InvalidAmount)
        );
    }

    #[test]
    fn test_create_limits_live_escrows_per_account() {
        let mut ledger = EscrowLedger::new(LedgerConfig {
            max_escrows_per_account: 1,
            ..LedgerConfig::default()
        });
        ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();

        let mut second = params(NOW + 3600);
        second.secret_hash = Secret([2u8; 32]).hash();
        assert!(matches!(
            ledger.create(&alice(), NOW, second),
            Err(EscrowError::TooManyEscrows { .. })
        ));
    }

    #[test]
    fn test_fund_checks_funder_amount_and_state() {
        let mut ledger = funded_ledger();
        let (id, _) = ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();

        assert_eq!(
            ledger.fund(&bob(), NOW, id, EscrowValue::amount(100)),
            Err(EscrowError::WrongFunder)
        );
        assert_eq!(
            ledger.fund(&alice(), NOW, id, EscrowValue::amount(99)),
            Err(EscrowError::WrongAmount)
        );

        ledger.fund(&alice(), NOW, id, EscrowValue::amount(100)).unwrap();
        assert_eq!(ledger.balance_of(&alice(), &usdc()), 900);

        assert_eq!(
            ledger.fund(&alice(), NOW, id, EscrowValue::amount(100)),
            Err(EscrowError::InvalidState {
                state: EscrowState::Funded
            })
        );
    }

    #[test]
    fn test_fund_requires_balance() {
        let mut ledger = EscrowLedger::default();
        let (id, _) = ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();
        assert!(matches!(
            ledger.fund(&alice(), NOW, id, EscrowValue::amount(100)),
            Err(EscrowError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_complete_is_open_to_any_caller_with_the_secret() {
        let mut ledger = funded_ledger();
        let id = create_and_fund(&mut ledger);

        assert_eq!(
            ledger.complete(&AccountId::new("carol"), NOW + 2, id, Secret([0u8; 32])),
            Err(EscrowError::InvalidSecret)
        );

        let event = ledger
            .complete(&AccountId::new("carol"), NOW + 2, id, secret())
            .unwrap();
        assert!(matches!(event, LedgerEvent::EscrowCompleted { .. }));
        assert_eq!(ledger.balance_of(&bob(), &usdc()), 100);
        assert_eq!(ledger.escrow(id).unwrap().secret, Some(secret()));
    }

    #[test]
    fn test_complete_twice_fails_without_moving_funds() {
        let mut ledger = funded_ledger();
        let id = create_and_fund(&mut ledger);

        ledger.complete(&bob(), NOW + 2, id, secret()).unwrap();
        assert_eq!(
            ledger.complete(&bob(), NOW + 3, id, secret()),
            Err(EscrowError::InvalidState {
                state: EscrowState::Completed
            })
        );
        assert_eq!(ledger.balance_of(&bob(), &usdc()), 100);
        assert_eq!(ledger.balance_of(&alice(), &usdc()), 900);
    }

    #[test]
    fn test_complete_after_expiry_is_rejected() {
        let mut ledger = funded_ledger();
        let id = create_and_fund(&mut ledger);
        assert_eq!(
            ledger.complete(&bob(), NOW + 3600, id, secret()),
            Err(EscrowError::TimelockExpired)
        );
    }

    #[test]
    fn test_cancel_rules() {
        let mut ledger = funded_ledger();
        let id = create_and_fund(&mut ledger);

        assert_eq!(ledger.cancel(&bob(), NOW + 4000, id), Err(EscrowError::Unauthorized));
        assert_eq!(
            ledger.cancel(&alice(), NOW + 10, id),
            Err(EscrowError::TimelockNotExpired)
        );

        ledger.cancel(&alice(), NOW + 3600, id).unwrap();
        assert_eq!(ledger.balance_of(&alice(), &usdc()), 1_000);
        assert_eq!(ledger.escrow(id).unwrap().state, EscrowState::Cancelled);
    }

    #[test]
    fn test_withdrawal_before_funding_frees_secret_hash() {
        let mut ledger = funded_ledger();
        let (id, _) = ledger.create(&alice(), NOW, params(NOW + 3600)).unwrap();
        ledger.cancel(&alice(), NOW, id).unwrap();
        assert_eq!(ledger.balance_of(&alice(), &usdc()), 1_000);
        assert!(ledger.escrow_by_secret(&secret().hash()).is_none());
        assert!(ledger.create(&alice(), NOW, params(NOW + 3600)).is_ok());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut ledger = funded_ledger();
        let completed = create_and_fund(&mut ledger);
        ledger.complete(&bob(), NOW + 2, completed, secret()).unwrap();

        for result in [
            ledger.cancel(&alice(), NOW + 10_000, completed),
            ledger.fund(&alice(), NOW + 2, completed, EscrowValue::amount(100)),
        ] {
            assert!(matches!(result, Err(EscrowError::InvalidState { .. })));
        }
        assert_eq!(ledger.escrow(completed).unwrap().state, EscrowState::Completed);

        let mut cancelled = params(NOW + 3600);
        cancelled.secret_hash = Secret([9u8; 32]).hash();
        let (id, _) = ledger.create(&alice(), NOW, cancelled).unwrap();
        ledger.cancel(&alice(), NOW, id).unwrap();
        assert!(ledger.complete(&bob(), NOW, id, Secret([9u8; 32])).is_err());
        assert!(ledger.cancel(&alice(), NOW, id).is_err());
        assert_eq!(ledger.escrow(id).unwrap().state, EscrowState::Cancelled);
    }

    #[test]
    fn test_pause_blocks_mutations() {
        let mut ledger = funded_ledger();
        ledger.set_paused(true);
        assert_eq!(
            ledger.create(&alice(), NOW, params(NOW + 3600)).map(|_| ()),
            Err(EscrowError::Paused)
        );
        ledger.set_paused(false);
        assert!(ledger.create(&alice(), NOW, params(NOW + 3600)).is_ok());
    }

    #[test]
    fn test_token_escrow_moves_ownership() {
        let mut ledger = EscrowLedger::default();
        let collection = AssetRef::new("PUNKS");
        ledger.mint(&alice(), &collection, EscrowValue::token(7));

        let (id, _) = ledger
            .create(
                &alice(),
                NOW,
                CreateEscrow {
                    secret_hash: secret().hash(),
                    timelock_expiry: NOW + 3600,
                    beneficiary: bob(),
                    asset: collection.clone(),
                    value: EscrowValue::token(7),
                },
            )
            .unwrap();
        ledger.fund(&alice(), NOW, id, EscrowValue::token(7)).unwrap();
        assert_eq!(ledger.owner_of(&collection, 7), None);

        ledger.complete(&bob(), NOW + 1, id, secret()).unwrap();
        assert_eq!(ledger.owner_of(&collection, 7), Some(&bob()));
    }

    #[test]
    fn test_lookup_indexes() {
        let mut ledger = funded_ledger();
        let id = create_and_fund(&mut ledger);
        assert_eq!(ledger.escrows_by_creator(&alice()), vec![id]);
        assert_eq!(ledger.escrows_by_beneficiary(&bob()), vec![id]);
        assert_eq!(ledger.escrow_by_secret(&secret().hash()).map(|e| e.id), Some(id));
        assert_eq!(ledger.time_remaining(id, NOW + 600), Some(3000));
    }
}
