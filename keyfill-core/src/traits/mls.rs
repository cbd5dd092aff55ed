// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ClientId, CryptoProviderFailure, KeyPackage, KeyPackageCount, NetworkFailure, StorageFailure,
    Timestamp,
};

/// Everything the key package refill needs to know about and do with our MLS key packages.
pub trait KeyPackageRepository: Send + Sync {
    /// Returns how many unclaimed key packages the server holds for this client.
    fn available_key_package_count(
        &self,
        client_id: &ClientId,
    ) -> impl Future<Output = Result<KeyPackageCount, NetworkFailure>> + Send;

    fn upload_new_key_packages(
        &self,
        client_id: &ClientId,
        batch: Vec<KeyPackage>,
    ) -> impl Future<Output = Result<(), NetworkFailure>> + Send;

    /// Returns the time the key package count was checked the last time, `None` if never.
    fn last_key_package_count_check(
        &self,
    ) -> impl Future<Output = Result<Option<Timestamp>, StorageFailure>> + Send;

    fn update_last_key_package_count_check(
        &self,
        instant: Timestamp,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;
}

/// Remote key package endpoints of the directory.
pub trait KeyPackageApi: Send + Sync {
    fn available_key_package_count(
        &self,
        client_id: &ClientId,
    ) -> impl Future<Output = Result<KeyPackageCount, NetworkFailure>> + Send;

    fn upload_key_packages(
        &self,
        client_id: &ClientId,
        batch: Vec<KeyPackage>,
    ) -> impl Future<Output = Result<(), NetworkFailure>> + Send;
}

/// MLS crypto provider holding the private part of our key packages.
pub trait MlsCryptoProvider: Send + Sync {
    fn generate_key_packages(
        &self,
        client_id: &ClientId,
        amount: u32,
    ) -> impl Future<Output = Result<Vec<KeyPackage>, CryptoProviderFailure>> + Send;
}

/// Local persistence of the key package bookkeeping of one identity.
pub trait KeyPackageStore: Send + Sync {
    fn last_key_package_count_check(
        &self,
    ) -> impl Future<Output = Result<Option<Timestamp>, StorageFailure>> + Send;

    fn update_last_key_package_count_check(
        &self,
        instant: Timestamp,
    ) -> impl Future<Output = Result<(), StorageFailure>> + Send;
}

/// Resolves the client we are currently running as.
pub trait ClientIdProvider: Send + Sync {
    /// Returns `None` if no client has been registered yet.
    fn current_client_id(
        &self,
    ) -> impl Future<Output = Result<Option<ClientId>, StorageFailure>> + Send;

    /// Returns `true` if the current client has completed its MLS registration.
    fn has_registered_mls_client(
        &self,
    ) -> impl Future<Output = Result<bool, StorageFailure>> + Send;
}
