// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use keyfill_core::{MAX_PREKEY_ID, PreKeyId};
use thiserror::Error;

use crate::policy::KeyPackageLimits;

const LOW_ON_PREKEYS_THRESHOLD: u16 = 20;
const REMOTE_PREKEY_TARGET_COUNT: u16 = 100;
const MIN_INTERVAL_BETWEEN_PROTEUS_REFILLS: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_INTERVAL_BETWEEN_KEY_PACKAGE_CHECKS: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration parameters for refilling Proteus pre-keys.
#[derive(Clone, Debug)]
pub struct ProteusRefillConfig {
    /// Refill when the server holds fewer pre-keys than this.
    ///
    /// Default: 20.
    pub(crate) low_on_prekeys_threshold: u16,

    /// Number of pre-keys generated and uploaded per refill.
    ///
    /// Default: 100.
    pub(crate) remote_prekey_target_count: u16,

    /// Highest id a regular pre-key may have. The id above is reserved for the last-resort key.
    ///
    /// Default: 0xFFFE.
    pub(crate) max_prekey_id: PreKeyId,

    /// Minimum time between two checks of the remote pre-key count.
    ///
    /// Default: 24 hours.
    pub(crate) min_interval: Duration,
}

impl ProteusRefillConfig {
    /// Return a default instance of `ProteusRefillConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define the remote pre-key count below which a refill is triggered.
    pub fn low_on_prekeys_threshold(mut self, threshold: u16) -> Self {
        self.low_on_prekeys_threshold = threshold;
        self
    }

    /// Define the number of pre-keys generated and uploaded per refill.
    pub fn remote_prekey_target_count(mut self, count: u16) -> Self {
        self.remote_prekey_target_count = count;
        self
    }

    /// Define the highest id a regular pre-key may have.
    pub fn max_prekey_id(mut self, id: PreKeyId) -> Self {
        self.max_prekey_id = id;
        self
    }

    /// Define the minimum time between two checks of the remote pre-key count.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_prekey_target_count == 0 {
            return Err(ConfigError::ZeroTargetCount);
        }

        // Ids `0..=max` give room for `max + 1` pre-keys.
        if u32::from(self.remote_prekey_target_count) > u32::from(self.max_prekey_id) + 1 {
            return Err(ConfigError::TargetExceedsIdSpace {
                target: self.remote_prekey_target_count,
                max: self.max_prekey_id,
            });
        }

        validate_interval(self.min_interval)
    }
}

impl Default for ProteusRefillConfig {
    fn default() -> Self {
        Self {
            low_on_prekeys_threshold: LOW_ON_PREKEYS_THRESHOLD,
            remote_prekey_target_count: REMOTE_PREKEY_TARGET_COUNT,
            max_prekey_id: MAX_PREKEY_ID,
            min_interval: MIN_INTERVAL_BETWEEN_PROTEUS_REFILLS,
        }
    }
}

/// Configuration parameters for refilling MLS key packages.
#[derive(Clone, Debug)]
pub struct KeyPackageRefillConfig {
    /// Amount of key packages we aim to hold on the server and the fraction of it below which we
    /// refill.
    ///
    /// Default: 100 key packages, refill below 50%.
    pub(crate) limits: KeyPackageLimits,

    /// Minimum time between two checks of the remote key package count.
    ///
    /// Default: 24 hours.
    pub(crate) min_interval: Duration,

    /// If MLS is available for this user at all.
    ///
    /// Default: true.
    pub(crate) mls_supported: bool,
}

impl KeyPackageRefillConfig {
    /// Return a default instance of `KeyPackageRefillConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define the key package limit and refill threshold.
    pub fn limits(mut self, limits: KeyPackageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Define the minimum time between two checks of the remote key package count.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Enable or disable MLS for this user.
    pub fn mls_supported(mut self, supported: bool) -> Self {
        self.mls_supported = supported;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.limit() == 0 {
            return Err(ConfigError::ZeroKeyPackageLimit);
        }

        let fraction = self.limits.threshold_fraction();
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidThresholdFraction(fraction));
        }

        validate_interval(self.min_interval)
    }
}

impl Default for KeyPackageRefillConfig {
    fn default() -> Self {
        Self {
            limits: KeyPackageLimits::default(),
            min_interval: MIN_INTERVAL_BETWEEN_KEY_PACKAGE_CHECKS,
            mls_supported: true,
        }
    }
}

fn validate_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::ZeroInterval);
    }

    if interval > MAX_INTERVAL {
        return Err(ConfigError::IntervalTooLarge(interval));
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("refill target count must be larger than zero")]
    ZeroTargetCount,

    #[error("refill target of {target} pre-keys does not fit into id space 0..={max}")]
    TargetExceedsIdSpace { target: u16, max: PreKeyId },

    #[error("key package limit must be larger than zero")]
    ZeroKeyPackageLimit,

    #[error("refill threshold fraction {0} is not within (0, 1]")]
    InvalidThresholdFraction(f32),

    #[error("minimum interval between checks must be larger than zero")]
    ZeroInterval,

    #[error("minimum interval between checks of {0:?} exceeds one year")]
    IntervalTooLarge(Duration),
}
