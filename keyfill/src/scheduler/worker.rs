// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use futures_util::{FutureExt, Stream, StreamExt};
use keyfill_core::{Clock, SyncLiveness, SystemClock};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, warn};

use crate::scheduler::{ScheduledRefill, SchedulerState};

/// Deadline used when an interval reaches beyond what an [`Instant`] can represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What the event loop does after handling an event.
enum Next {
    /// Check again at the given instant, unless we stop being live before.
    Arm(Instant),
    Idle,
    Stop,
}

/// Runs a refill task whenever the sync engine reports us live and the task's last check lies at
/// least its minimum interval back.
///
/// If we become live before the interval passed, the scheduler arms a timer for the remaining
/// time and checks once it fires, as long as we did not stop being live in the meantime. There
/// is exactly one event loop per scheduler and cycles run inside of it, so they never overlap.
#[derive(Debug)]
pub struct SyncGatedScheduler<T, C = SystemClock> {
    task: T,
    clock: C,
}

impl<T> SyncGatedScheduler<T>
where
    T: ScheduledRefill,
{
    pub fn new(task: T) -> Self {
        Self::with_clock(task, SystemClock)
    }
}

impl<T, C> SyncGatedScheduler<T, C>
where
    T: ScheduledRefill,
    C: Clock,
{
    pub fn with_clock(task: T, clock: C) -> Self {
        Self { task, clock }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    /// Launches the event loop on the tokio runtime, observing the given liveness stream.
    ///
    /// The loop ends when the stream ends, on [`SchedulerHandle::shutdown`] or when the handle
    /// gets dropped.
    pub fn spawn<L>(self, liveness: L) -> SchedulerHandle
    where
        L: Stream<Item = SyncLiveness> + Send + Unpin + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let token = CancellationToken::new();

        let handle = tokio::spawn({
            let token = token.clone();
            async move { self.run(liveness, token, state_tx).await }
        });

        SchedulerHandle {
            state: state_rx,
            token,
            handle: AbortOnDropHandle::new(handle),
        }
    }

    /// The scheduler event loop.
    ///
    /// Listens and responds to three kinds of events:
    ///
    /// - A shutdown signal
    /// - A liveness update, arming or disarming the scheduler
    /// - The timer of an armed scheduler firing
    async fn run<L>(
        self,
        mut liveness: L,
        token: CancellationToken,
        state: watch::Sender<SchedulerState>,
    ) where
        L: Stream<Item = SyncLiveness> + Send + Unpin,
    {
        let name = self.task.name();
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let next = tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("{}: scheduler received shutdown signal", name);
                    break;
                }
                update = liveness.next() => {
                    let Some(update) = update else {
                        debug!("{}: liveness stream ended", name);
                        break;
                    };

                    if update.is_live() {
                        self.evaluate(&mut liveness, &token, &state).await
                    } else {
                        if deadline.is_some() {
                            debug!("{}: not live anymore ({:?}), cancel pending check", name, update);
                        }
                        Next::Idle
                    }
                }
                _ = timer => {
                    self.evaluate(&mut liveness, &token, &state).await
                }
            };

            match next {
                Next::Arm(at) => {
                    deadline = Some(at);
                    state.send_replace(SchedulerState::Armed {
                        remaining: at.saturating_duration_since(Instant::now()),
                    });
                }
                Next::Idle => {
                    deadline = None;
                    state.send_replace(SchedulerState::Idle);
                }
                Next::Stop => break,
            }
        }

        state.send_replace(SchedulerState::Idle);
    }

    /// Runs a refill cycle if one is due and decides what to wait for next.
    async fn evaluate<L>(
        &self,
        liveness: &mut L,
        token: &CancellationToken,
        state: &watch::Sender<SchedulerState>,
    ) -> Next
    where
        L: Stream<Item = SyncLiveness> + Send + Unpin,
    {
        let name = self.task.name();
        let min_interval = self.task.min_interval();

        if !self.task.is_enabled().await {
            debug!("{}: refills are disabled", name);
            return Next::Idle;
        }

        let now = self.clock.now();
        let last_check = match self.task.last_check().await {
            Ok(last_check) => last_check,
            Err(err) => {
                warn!("{}: could not read last check, try again later: {}", name, err);
                return Next::Arm(deadline_after(Instant::now(), min_interval));
            }
        };

        // A last check in the future counts as just checked.
        if let Some(last_check) = last_check {
            let elapsed = now.saturating_duration_since(last_check);
            if elapsed < min_interval {
                let remaining = min_interval - elapsed;
                debug!(
                    "{}: last check was {:?} ago, next check in {:?}",
                    name, elapsed, remaining
                );
                return Next::Arm(deadline_after(Instant::now(), remaining));
            }
        }

        state.send_replace(SchedulerState::Checking);
        let started = Instant::now();

        let result = tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!("{}: refill cycle cancelled", name);
                return Next::Stop;
            }
            result = self.task.refill() => result,
        };

        match result {
            Ok(outcome) => debug!("{}: refill cycle completed: {:?}", name, outcome),
            Err(err) => warn!("{}: refill cycle failed: {}", name, err),
        }

        // Failed cycles count as checks as well, the next attempt waits for the full interval.
        if let Err(err) = self.task.set_last_check(now).await {
            error!("{}: failed to persist last check: {}", name, err);
        }

        // Liveness updates which arrived during the cycle are dropped, only the latest one
        // decides if we stay armed.
        let mut live = true;
        while let Some(update) = liveness.next().now_or_never() {
            match update {
                Some(update) => live = update.is_live(),
                None => return Next::Stop,
            }
        }

        if live {
            Next::Arm(deadline_after(started, min_interval))
        } else {
            Next::Idle
        }
    }
}

/// Instant `interval` after `start`, clamped to a far future deadline instead of overflowing.
fn deadline_after(start: Instant, interval: Duration) -> Instant {
    start
        .checked_add(interval)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Handle to a spawned [`SyncGatedScheduler`].
///
/// Dropping the handle aborts the scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    state: watch::Receiver<SchedulerState>,
    token: CancellationToken,
    handle: AbortOnDropHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Subscribe to state changes of the scheduler.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the scheduler, cancelling a refill cycle in flight, and waits until it ended.
    pub async fn shutdown(self) {
        self.token.cancel();
        match self.handle.await {
            Err(err) if err.is_panic() => error!("scheduler panicked: {}", err),
            _ => (),
        }
    }
}
