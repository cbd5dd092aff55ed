// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure decisions on when to refill and how much.
use keyfill_core::{KeyPackageCount, PreKeyId};

const KEY_PACKAGE_LIMIT: u32 = 100;
const KEY_PACKAGE_LOWER_LIMIT: u32 = 10;
const KEY_PACKAGE_THRESHOLD_FRACTION: f32 = 0.5;

/// Returns `true` if the server holds fewer pre-keys than `threshold`.
///
/// A count exactly at the threshold is still considered enough.
pub fn needs_prekey_refill(remote_count: usize, threshold: u16) -> bool {
    remote_count < usize::from(threshold)
}

/// Chooses the first id of a new batch of `count` pre-keys.
///
/// Continues right after `most_recent` (or after `0` if we never uploaded anything) as long as
/// the whole batch stays within `max`. Otherwise allocation restarts at `0`: the ids directly
/// below `max` might still be unclaimed on the server, the oldest ids at the start of the range
/// are the ones most likely consumed by now.
pub fn prekey_start_id(most_recent: Option<PreKeyId>, count: u16, max: PreKeyId) -> PreKeyId {
    let most_recent = u32::from(most_recent.unwrap_or(0));
    // A batch of zero still occupies the start id.
    let count = u32::from(count.max(1));

    if most_recent + count > u32::from(max) {
        0
    } else {
        // Fits, since `most_recent + 1 <= most_recent + count <= max`.
        (most_recent + 1) as PreKeyId
    }
}

/// Amount of key packages we want to have on the server and when to top them up.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeyPackageLimits {
    limit: u32,
    threshold_fraction: f32,
}

impl KeyPackageLimits {
    pub fn new(limit: u32, threshold_fraction: f32) -> Self {
        Self {
            limit,
            threshold_fraction,
        }
    }

    /// Smaller limits for test environments where backends are reset often.
    pub fn lower() -> Self {
        Self::new(KEY_PACKAGE_LOWER_LIMIT, KEY_PACKAGE_THRESHOLD_FRACTION)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn threshold_fraction(&self) -> f32 {
        self.threshold_fraction
    }

    /// Count below which a refill is needed, `floor(limit * fraction)`.
    pub fn threshold(&self) -> KeyPackageCount {
        // Float to int casts saturate, negative and NaN become zero.
        (f64::from(self.limit) * f64::from(self.threshold_fraction)).floor() as KeyPackageCount
    }

    pub fn needs_refill(&self, count: KeyPackageCount) -> bool {
        count < self.threshold()
    }

    /// Amount of key packages missing to reach the limit again.
    pub fn refill_amount(&self, count: KeyPackageCount) -> u32 {
        self.limit.saturating_sub(count)
    }

    /// Amount of key packages uploaded right after registering a new client.
    pub fn initial_amount(&self) -> u32 {
        self.limit
    }
}

impl Default for KeyPackageLimits {
    fn default() -> Self {
        Self::new(KEY_PACKAGE_LIMIT, KEY_PACKAGE_THRESHOLD_FRACTION)
    }
}
