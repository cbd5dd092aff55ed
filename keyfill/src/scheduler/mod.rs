// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running refill cycles whenever we are live and the last check lies far enough back.
mod worker;

use std::time::Duration;

use keyfill_core::{RefillError, StorageFailure, Timestamp};

use crate::RefillOutcome;

pub use worker::{SchedulerHandle, SyncGatedScheduler};

/// A refill cycle together with the bookkeeping of when it last ran.
///
/// Implemented by both orchestrators, so the scheduler is written once and runs either of them.
pub trait ScheduledRefill: Send + Sync + 'static {
    /// Short name used to tag log lines of the scheduler.
    fn name(&self) -> &'static str;

    /// Minimum time between two refill cycles.
    fn min_interval(&self) -> Duration;

    /// Returns `false` if refills should not run at all right now.
    fn is_enabled(&self) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// Returns the instant of the last completed check, `None` if there never was one.
    fn last_check(&self) -> impl Future<Output = Result<Option<Timestamp>, StorageFailure>> + Send;

    fn set_last_check(
        &self,
        instant: Timestamp,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;

    /// Runs one refill cycle.
    fn refill(&self) -> impl Future<Output = Result<RefillOutcome, RefillError>> + Send;
}

/// Observable state of a [`SyncGatedScheduler`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SchedulerState {
    /// We are not live, nothing is scheduled.
    #[default]
    Idle,

    /// We are live and wait until the next check is due.
    Armed { remaining: Duration },

    /// A refill cycle is in flight.
    Checking,
}
