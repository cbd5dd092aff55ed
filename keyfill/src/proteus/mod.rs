// SPDX-License-Identifier: MIT OR Apache-2.0

//! Refilling Proteus pre-keys.
mod data_source;
mod refiller;

pub use data_source::PreKeyDataSource;
pub use refiller::ProteusPreKeyRefiller;

use keyfill_core::SystemClock;

use crate::scheduler::SyncGatedScheduler;

/// Scheduler checking our remote pre-keys whenever we are live and the last check is due.
pub type ProteusSyncWorker<R, C = SystemClock> = SyncGatedScheduler<ProteusPreKeyRefiller<R>, C>;
