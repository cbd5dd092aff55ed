// SPDX-License-Identifier: MIT OR Apache-2.0

//! Refilling MLS key packages.
mod count;
mod data_source;
mod refill;

pub use count::{KeyPackageCountStatus, KeyPackageCountUseCase};
pub use data_source::KeyPackageDataSource;
pub use refill::RefillKeyPackagesUseCase;

use keyfill_core::SystemClock;

use crate::scheduler::SyncGatedScheduler;

/// Scheduler checking our remote key package count whenever we are live and the last check is
/// due.
pub type KeyPackageManager<K, M, I, C = SystemClock> =
    SyncGatedScheduler<RefillKeyPackagesUseCase<K, M, I>, C>;
