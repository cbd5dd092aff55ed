// SPDX-License-Identifier: MIT OR Apache-2.0

//! `keyfill` keeps a client's pool of single-use key material topped up on a remote directory,
//! so other participants can always establish a fresh encrypted session with us or add us to a
//! group, even while we are offline.
//!
//! Two protocols are supported:
//!
//! - **Proteus pre-keys**, refilled by [`ProteusPreKeyRefiller`]. Pre-key ids are small integers
//!   which wrap around a fixed-size id space. Allocation restarts at `0` when a full batch would
//!   not fit anymore and the persisted "most recent id" only advances after the server confirmed
//!   an upload, so ids are never silently skipped.
//! - **MLS key packages**, refilled by [`RefillKeyPackagesUseCase`] whenever the remote count
//!   drops below a configured fraction of the limit.
//!
//! ## Scheduling
//!
//! Refills are driven by a [`SyncGatedScheduler`], one per identity and protocol. It observes
//! the liveness of the sync engine and only checks the remote directory when we are live _and_
//! the last check lies longer back than a configured minimum interval. If we become live too
//! early, the scheduler waits out the remaining time itself, it does not need another liveness
//! change to run the check. At most one refill cycle is ever in flight per scheduler.
//!
//! ```text
//!            live, due                       refill done, still live
//!   Idle ─────────────────▶ Checking ───────────────────────────────▶ Armed
//!    ▲ ▲   live, not due                                              │  │
//!    │ └──────────────────────────────────────────────────────────────┘  │
//!    │        not live                                     timer fired   │
//!    └───────────────────────────────────── Checking ◀──────────────────┘
//! ```
//!
//! Errors during a cycle (network, crypto provider, storage) are logged and never stop the
//! scheduler, the fixed minimum interval is the only throttle.
//!
//! ## Integration
//!
//! All collaborators (remote directory, crypto provider, persistence, sync engine) are injected
//! through the traits in [`keyfill_core::traits`]. The data sources in this crate compose the
//! narrow `*Api`, `*CryptoProvider` and `*Store` interfaces into the repositories the
//! orchestrators need. An in-memory store lives in `keyfill-store`.
mod config;
mod key_package;
mod liveness;
mod policy;
mod proteus;
mod scheduler;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::{ConfigError, KeyPackageRefillConfig, ProteusRefillConfig};
pub use key_package::{
    KeyPackageCountStatus, KeyPackageCountUseCase, KeyPackageDataSource, KeyPackageManager,
    RefillKeyPackagesUseCase,
};
pub use liveness::InMemorySyncLiveness;
pub use policy::{KeyPackageLimits, needs_prekey_refill, prekey_start_id};
pub use proteus::{PreKeyDataSource, ProteusPreKeyRefiller, ProteusSyncWorker};
pub use scheduler::{ScheduledRefill, SchedulerHandle, SchedulerState, SyncGatedScheduler};

/// Result of a successful refill cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Enough key material was still available remotely, nothing was generated.
    NotNeeded { available: u32 },

    /// A new batch was generated and its upload confirmed by the server.
    Refilled { available: u32, generated: u32 },
}
