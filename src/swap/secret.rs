//! Secret generation and gated reveal

use super::intent::SwapIntent;
use super::timelock::TimelockPolicy;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{EscrowState, Secret, SecretHash};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use uuid::Uuid;

/// Holds swap secrets until the destination leg is safe to complete
pub struct SecretVault {
    secrets: DashMap<Uuid, Secret>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
        }
    }

    /// Generate a fresh 32-byte secret for a swap and return its hash
    pub fn generate(&self, swap_id: Uuid) -> (Secret, SecretHash) {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret = Secret(bytes);
        self.secrets.insert(swap_id, secret);
        (secret, secret.hash())
    }

    /// Put back a secret loaded from the store
    pub fn restore(&self, swap_id: Uuid, secret: Secret) {
        self.secrets.insert(swap_id, secret);
    }

    pub fn holds(&self, swap_id: &Uuid) -> bool {
        self.secrets.contains_key(swap_id)
    }

    /// Release the secret for destination completion
    ///
    /// Refused unless the destination escrow is observed funded, the timelock
    /// pair still satisfies the margin, and the destination lock has not expired.
    pub fn reveal(
        &self,
        intent: &SwapIntent,
        policy: &TimelockPolicy,
        dest_now: u64,
    ) -> RelayerResult<Secret> {
        let refuse = |reason: &str| RelayerError::PrematureReveal {
            swap_id: intent.swap_id,
            reason: reason.to_string(),
        };

        if intent.dest.observed != Some(EscrowState::Funded) {
            return Err(refuse("destination escrow not observed funded"));
        }
        let timelocks = intent
            .timelocks
            .ok_or_else(|| refuse("swap has no timelocks"))?;
        if policy.verify(&timelocks).is_err() {
            return Err(refuse("timelock margin violated"));
        }
        if !policy.reveal_allowed(&timelocks, dest_now) {
            return Err(refuse("destination timelock expired"));
        }

        let secret = self
            .secrets
            .get(&intent.swap_id)
            .map(|s| *s)
            .ok_or(RelayerError::SecretUnavailable(intent.swap_id))?;

        if !secret.matches(&intent.secret_hash) {
            return Err(RelayerError::InvalidSecret);
        }

        debug!("Secret released for swap {}", intent.swap_id);
        Ok(secret)
    }

    pub fn forget(&self, swap_id: &Uuid) {
        self.secrets.remove(swap_id);
    }
}

impl Default for SecretVault {
    fn default() -> Self {
        Self::new()
    }
}
