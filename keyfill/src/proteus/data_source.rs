// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use futures_util::Stream;
use keyfill_core::traits::{PreKeyApi, PreKeyRepository, PreKeyStore, ProteusCryptoProvider};
use keyfill_core::{
    ClientId, CryptoProviderFailure, NetworkFailure, PreKeyId, PreKeyMaterial, StorageFailure,
    Timestamp,
};
use tracing::trace;

/// Pre-key repository of one client, composed from the remote directory, the Proteus crypto
/// provider and local persistence.
#[derive(Clone, Debug)]
pub struct PreKeyDataSource<A, C, S> {
    client_id: ClientId,
    api: A,
    crypto: C,
    store: S,
}

impl<A, C, S> PreKeyDataSource<A, C, S>
where
    A: PreKeyApi,
    C: ProteusCryptoProvider,
    S: PreKeyStore,
{
    pub fn new(client_id: ClientId, api: A, crypto: C, store: S) -> Self {
        Self {
            client_id,
            api,
            crypto,
            store,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<A, C, S> PreKeyRepository for PreKeyDataSource<A, C, S>
where
    A: PreKeyApi,
    C: ProteusCryptoProvider,
    S: PreKeyStore,
{
    async fn remotely_available_prekey_ids(&self) -> Result<HashSet<PreKeyId>, NetworkFailure> {
        let ids = self
            .api
            .remotely_available_prekey_ids(&self.client_id)
            .await?;
        trace!(
            "server holds {} pre-keys for client {}",
            ids.len(),
            self.client_id
        );
        Ok(ids.into_iter().collect())
    }

    async fn most_recent_prekey_id(&self) -> Result<Option<PreKeyId>, StorageFailure> {
        self.store.most_recent_prekey_id().await
    }

    async fn generate_new_prekeys(
        &self,
        start: PreKeyId,
        count: u16,
    ) -> Result<Vec<PreKeyMaterial>, CryptoProviderFailure> {
        self.crypto.new_prekeys(start, count).await
    }

    async fn upload_new_prekey_batch(&self, batch: &[PreKeyMaterial]) -> Result<(), NetworkFailure> {
        self.api.upload_prekeys(&self.client_id, batch).await
    }

    async fn update_most_recent_prekey_id(&self, id: PreKeyId) -> Result<(), StorageFailure> {
        self.store.update_most_recent_prekey_id(id).await
    }

    async fn last_prekey_upload_instant(&self) -> Result<Option<Timestamp>, StorageFailure> {
        self.store.last_prekey_upload_instant().await
    }

    async fn set_last_prekey_upload_instant(&self, instant: Timestamp) -> Result<(), StorageFailure> {
        self.store.set_last_prekey_upload_instant(instant).await
    }

    fn observe_last_prekey_upload_instant(
        &self,
    ) -> impl Stream<Item = Option<Timestamp>> + Send + Unpin + 'static {
        self.store.observe_last_prekey_upload_instant()
    }
}
