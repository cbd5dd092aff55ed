// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use keyfill_core::SyncLiveness;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

/// Liveness signal kept in memory, for sync engines which report their state by calling
/// [`update`](Self::update).
///
/// Clones share the same signal.
#[derive(Clone, Debug)]
pub struct InMemorySyncLiveness {
    tx: Arc<watch::Sender<SyncLiveness>>,
}

impl InMemorySyncLiveness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncLiveness::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, liveness: SyncLiveness) {
        let previous = self.tx.send_replace(liveness);
        if previous != liveness {
            trace!("sync liveness changed from {:?} to {:?}", previous, liveness);
        }
    }

    pub fn current(&self) -> SyncLiveness {
        *self.tx.borrow()
    }

    /// Stream of liveness updates, beginning with the current state.
    ///
    /// Updates which follow each other faster than the stream is polled are collapsed into the
    /// latest one.
    pub fn observe_sync_liveness(&self) -> WatchStream<SyncLiveness> {
        WatchStream::new(self.tx.subscribe())
    }
}

impl Default for InMemorySyncLiveness {
    fn default() -> Self {
        Self::new()
    }
}
