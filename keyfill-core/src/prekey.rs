// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Identifier of a Proteus pre-key.
///
/// Ids live in `[0, MAX_PREKEY_ID]`. `0xFFFF` is reserved for the last-resort pre-key and never
/// handed out during a refill.
pub type PreKeyId = u16;

/// Highest id a regular pre-key can have.
pub const MAX_PREKEY_ID: PreKeyId = 0xFFFE;

/// Returns the highest id of a batch or `None` if the batch is empty.
pub fn max_prekey_id(batch: &[PreKeyMaterial]) -> Option<PreKeyId> {
    batch.iter().map(PreKeyMaterial::id).max()
}

/// Public pre-key as produced by the crypto provider, ready to be uploaded.
///
/// The payload is opaque to us, only the crypto provider knows how to create or interpret it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMaterial {
    id: PreKeyId,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

impl PreKeyMaterial {
    pub fn new(id: PreKeyId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
