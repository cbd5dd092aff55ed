// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use futures_core::Stream;

use crate::{
    ClientId, CryptoProviderFailure, NetworkFailure, PreKeyId, PreKeyMaterial, StorageFailure,
    Timestamp,
};

/// Everything the pre-key refiller needs to know about and do with our Proteus pre-keys.
pub trait PreKeyRepository: Send + Sync {
    /// Returns the ids of all pre-keys the server still holds for our client, that is pre-keys
    /// which have been uploaded but not been consumed by anyone yet.
    fn remotely_available_prekey_ids(
        &self,
    ) -> impl Future<Output = Result<HashSet<PreKeyId>, NetworkFailure>> + Send;

    /// Returns the highest pre-key id of the last confirmed upload or `None` if we never uploaded
    /// a batch.
    fn most_recent_prekey_id(
        &self,
    ) -> impl Future<Output = Result<Option<PreKeyId>, StorageFailure>> + Send;

    /// Generates `count` new pre-keys with consecutive ids, beginning at `start`.
    fn generate_new_prekeys(
        &self,
        start: PreKeyId,
        count: u16,
    ) -> impl Future<Output = Result<Vec<PreKeyMaterial>, CryptoProviderFailure>> + Send;

    /// Publishes a batch of pre-keys on the server.
    fn upload_new_prekey_batch(
        &self,
        batch: &[PreKeyMaterial],
    ) -> impl Future<Output = Result<(), NetworkFailure>> + Send;

    /// Remembers the highest pre-key id of a confirmed upload.
    fn update_most_recent_prekey_id(
        &self,
        id: PreKeyId,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;

    /// Returns the time the pre-key count was checked the last time, `None` if never.
    fn last_prekey_upload_instant(
        &self,
    ) -> impl Future<Output = Result<Option<Timestamp>, StorageFailure>> + Send;

    fn set_last_prekey_upload_instant(
        &self,
        instant: Timestamp,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;

    /// Stream of the last check instant, starting with the current value.
    fn observe_last_prekey_upload_instant(
        &self,
    ) -> impl Stream<Item = Option<Timestamp>> + Send + Unpin + 'static;
}

/// Remote pre-key endpoints of the directory.
pub trait PreKeyApi: Send + Sync {
    fn remotely_available_prekey_ids(
        &self,
        client_id: &ClientId,
    ) -> impl Future<Output = Result<Vec<PreKeyId>, NetworkFailure>> + Send;

    fn upload_prekeys(
        &self,
        client_id: &ClientId,
        batch: &[PreKeyMaterial],
    ) -> impl Future<Output = Result<(), NetworkFailure>> + Send;
}

/// Proteus crypto provider holding our pre-key secrets.
pub trait ProteusCryptoProvider: Send + Sync {
    /// Generates `count` pre-keys with ids `start..start + count`, keeping their secrets and
    /// returning the public part.
    fn new_prekeys(
        &self,
        start: PreKeyId,
        count: u16,
    ) -> impl Future<Output = Result<Vec<PreKeyMaterial>, CryptoProviderFailure>> + Send;
}

/// Local persistence of the pre-key bookkeeping of one identity.
pub trait PreKeyStore: Send + Sync {
    fn most_recent_prekey_id(
        &self,
    ) -> impl Future<Output = Result<Option<PreKeyId>, StorageFailure>> + Send;

    fn update_most_recent_prekey_id(
        &self,
        id: PreKeyId,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;

    fn last_prekey_upload_instant(
        &self,
    ) -> impl Future<Output = Result<Option<Timestamp>, StorageFailure>> + Send;

    fn set_last_prekey_upload_instant(
        &self,
        instant: Timestamp,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;

    fn observe_last_prekey_upload_instant(
        &self,
    ) -> impl Stream<Item = Option<Timestamp>> + Send + Unpin + 'static;
}
