// SPDX-License-Identifier: MIT OR Apache-2.0

use keyfill_core::traits::{KeyPackageApi, KeyPackageRepository, KeyPackageStore};
use keyfill_core::{
    ClientId, KeyPackage, KeyPackageCount, NetworkFailure, StorageFailure, Timestamp,
};

/// Key package repository composed from the remote directory and local persistence.
#[derive(Clone, Debug)]
pub struct KeyPackageDataSource<A, S> {
    api: A,
    store: S,
}

impl<A, S> KeyPackageDataSource<A, S>
where
    A: KeyPackageApi,
    S: KeyPackageStore,
{
    pub fn new(api: A, store: S) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<A, S> KeyPackageRepository for KeyPackageDataSource<A, S>
where
    A: KeyPackageApi,
    S: KeyPackageStore,
{
    async fn available_key_package_count(
        &self,
        client_id: &ClientId,
    ) -> Result<KeyPackageCount, NetworkFailure> {
        self.api.available_key_package_count(client_id).await
    }

    async fn upload_new_key_packages(
        &self,
        client_id: &ClientId,
        batch: Vec<KeyPackage>,
    ) -> Result<(), NetworkFailure> {
        self.api.upload_key_packages(client_id, batch).await
    }

    async fn last_key_package_count_check(&self) -> Result<Option<Timestamp>, StorageFailure> {
        self.store.last_key_package_count_check().await
    }

    async fn update_last_key_package_count_check(
        &self,
        instant: Timestamp,
    ) -> Result<(), StorageFailure> {
        self.store.update_last_key_package_count_check(instant).await
    }
}
