// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// State of our connection to the event pipeline, as reported by the sync engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncLiveness {
    /// We are connected and caught up with all events.
    Live,

    /// Sync has not started yet or is still catching up.
    #[default]
    Pending,

    /// Sync failed and is waiting to be retried.
    Failed,
}

impl SyncLiveness {
    pub fn is_live(&self) -> bool {
        matches!(self, SyncLiveness::Live)
    }
}
