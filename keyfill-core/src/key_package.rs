// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Number of key packages the remote directory still holds for a client.
///
/// This is only ever observed, never stored beyond the current check.
pub type KeyPackageCount = u32;

/// Serialized MLS key package as produced by the crypto provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage(#[serde(with = "serde_bytes")] Vec<u8>);

impl KeyPackage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}
