//! Timelock pair computation and safety checks

use crate::config::TimelockConfig;
use crate::error::{RelayerError, RelayerResult};

use serde::{Deserialize, Serialize};

/// Expiries of the two legs, unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timelocks {
    pub source_expiry: u64,
    pub dest_expiry: u64,
}

impl Timelocks {
    /// Gap between the legs; zero if the order is inverted
    pub fn margin(&self) -> u64 {
        self.source_expiry.saturating_sub(self.dest_expiry)
    }
}

/// Enforces `dest_expiry + Δ_min < source_expiry`
#[derive(Debug, Clone)]
pub struct TimelockPolicy {
    safety_margin: u64,
    min_margin: u64,
    min_leg_duration: u64,
    max_duration: u64,
    default_duration: u64,
}

impl TimelockPolicy {
    pub fn new(config: &TimelockConfig) -> RelayerResult<Self> {
        if config.safety_margin_secs <= config.min_margin_secs {
            return Err(RelayerError::Config(format!(
                "safety margin {}s must exceed the minimum {}s",
                config.safety_margin_secs, config.min_margin_secs
            )));
        }

        Ok(Self {
            safety_margin: config.safety_margin_secs,
            min_margin: config.min_margin_secs,
            min_leg_duration: config.min_leg_duration_secs,
            max_duration: config.max_duration_secs,
            default_duration: config.default_duration_secs,
        })
    }

    pub fn min_margin(&self) -> u64 {
        self.min_margin
    }

    pub fn default_duration(&self) -> u64 {
        self.default_duration
    }

    /// Shortest total duration this policy accepts
    pub fn min_duration(&self) -> u64 {
        self.safety_margin + self.min_leg_duration
    }

    /// Compute the pair for a swap of total duration `duration` starting at `now`
    pub fn compute(&self, now: u64, duration: u64) -> RelayerResult<Timelocks> {
        if duration < self.min_duration() {
            return Err(RelayerError::InsufficientTimelockMargin {
                requested: duration,
                required: self.min_duration(),
            });
        }
        if duration > self.max_duration {
            return Err(RelayerError::TimelockTooLong {
                requested: duration,
                max: self.max_duration,
            });
        }

        let timelocks = Timelocks {
            source_expiry: now + duration,
            dest_expiry: now + duration - self.safety_margin,
        };
        self.verify(&timelocks)?;
        Ok(timelocks)
    }

    /// Strict ordering with more than the minimum margin
    pub fn verify(&self, timelocks: &Timelocks) -> RelayerResult<()> {
        if timelocks.dest_expiry >= timelocks.source_expiry || timelocks.margin() <= self.min_margin
        {
            return Err(RelayerError::InsufficientTimelockMargin {
                requested: timelocks.margin(),
                required: self.min_margin,
            });
        }
        Ok(())
    }

    /// Whether a destination escrow may still be opened at `now`
    pub fn dest_window_open(&self, timelocks: &Timelocks, now: u64) -> bool {
        self.verify(timelocks).is_ok()
            && now.saturating_add(self.min_leg_duration) <= timelocks.dest_expiry
    }

    /// Whether the secret may be published on the destination chain at `now`
    pub fn reveal_allowed(&self, timelocks: &Timelocks, now: u64) -> bool {
        self.verify(timelocks).is_ok() && now < timelocks.dest_expiry
    }
}
