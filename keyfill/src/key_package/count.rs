// SPDX-License-Identifier: MIT OR Apache-2.0

use keyfill_core::traits::{ClientIdProvider, KeyPackageRepository};
use keyfill_core::{ClientId, KeyPackageCount, RefillError};
use tracing::trace;

use crate::config::{ConfigError, KeyPackageRefillConfig};
use crate::policy::KeyPackageLimits;

/// Remote key package count of our client and what it means for refilling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPackageCountStatus {
    pub client_id: ClientId,
    pub count: KeyPackageCount,
    pub needs_refill: bool,
}

/// Asks the server how many key packages it still holds for our client.
#[derive(Debug)]
pub struct KeyPackageCountUseCase<K, I> {
    repository: K,
    client_ids: I,
    limits: KeyPackageLimits,
    mls_supported: bool,
}

impl<K, I> KeyPackageCountUseCase<K, I>
where
    K: KeyPackageRepository,
    I: ClientIdProvider,
{
    pub fn new(
        repository: K,
        client_ids: I,
        config: &KeyPackageRefillConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            repository,
            client_ids,
            limits: config.limits,
            mls_supported: config.mls_supported,
        })
    }

    pub fn repository(&self) -> &K {
        &self.repository
    }

    pub fn client_ids(&self) -> &I {
        &self.client_ids
    }

    pub fn limits(&self) -> &KeyPackageLimits {
        &self.limits
    }

    pub fn mls_supported(&self) -> bool {
        self.mls_supported
    }

    pub async fn invoke(&self) -> Result<KeyPackageCountStatus, RefillError> {
        if !self.mls_supported {
            return Err(RefillError::MlsNotEnabled);
        }

        let client_id = self
            .client_ids
            .current_client_id()
            .await?
            .ok_or(RefillError::MissingClientRegistration)?;

        let count = self
            .repository
            .available_key_package_count(&client_id)
            .await?;
        trace!("server holds {} key packages for client {}", count, client_id);

        Ok(KeyPackageCountStatus {
            needs_refill: self.limits.needs_refill(count),
            client_id,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use keyfill_core::{ClientId, NetworkFailure, RefillError, StorageFailure};
    use keyfill_store::MemoryStore;

    use crate::config::{ConfigError, KeyPackageRefillConfig};
    use crate::key_package::KeyPackageDataSource;
    use crate::policy::KeyPackageLimits;
    use crate::test_utils::{FakeDirectory, StaticClientIdProvider};

    use super::{KeyPackageCountStatus, KeyPackageCountUseCase};

    type CountUseCase = KeyPackageCountUseCase<
        KeyPackageDataSource<FakeDirectory, MemoryStore>,
        StaticClientIdProvider,
    >;

    fn use_case(directory: &FakeDirectory, client_ids: StaticClientIdProvider) -> CountUseCase {
        KeyPackageCountUseCase::new(
            KeyPackageDataSource::new(directory.clone(), MemoryStore::new()),
            client_ids,
            &KeyPackageRefillConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reports_count_and_refill_need() {
        let alice = ClientId::new("alice");
        let directory = FakeDirectory::new();
        let use_case = use_case(&directory, StaticClientIdProvider::registered("alice"));

        directory.set_key_packages(&alice, 49);
        assert_eq!(
            use_case.invoke().await,
            Ok(KeyPackageCountStatus {
                client_id: alice.clone(),
                count: 49,
                needs_refill: true,
            })
        );

        directory.set_key_packages(&alice, 50);
        assert_eq!(
            use_case.invoke().await.map(|status| status.needs_refill),
            Ok(false)
        );
    }

    #[tokio::test]
    async fn missing_client_makes_no_request() {
        let directory = FakeDirectory::new();
        let use_case = use_case(&directory, StaticClientIdProvider::unregistered());

        assert_eq!(
            use_case.invoke().await,
            Err(RefillError::MissingClientRegistration)
        );
        assert_eq!(directory.key_package_count_requests(), 0);

        let use_case = KeyPackageCountUseCase::new(
            KeyPackageDataSource::new(directory.clone(), MemoryStore::new()),
            StaticClientIdProvider::registered("alice").failing(),
            &KeyPackageRefillConfig::default(),
        )
        .unwrap();
        assert_eq!(
            use_case.invoke().await,
            Err(RefillError::Storage(StorageFailure::Read("current client")))
        );
        assert_eq!(directory.key_package_count_requests(), 0);
    }

    #[tokio::test]
    async fn mls_disabled_makes_no_request() {
        let directory = FakeDirectory::new();
        let use_case = KeyPackageCountUseCase::new(
            KeyPackageDataSource::new(directory.clone(), MemoryStore::new()),
            StaticClientIdProvider::registered("alice"),
            &KeyPackageRefillConfig::new().mls_supported(false),
        )
        .unwrap();

        assert_eq!(use_case.invoke().await, Err(RefillError::MlsNotEnabled));
        assert_eq!(directory.key_package_count_requests(), 0);
    }

    #[tokio::test]
    async fn network_failure_propagates() {
        let directory = FakeDirectory::new();
        directory.set_offline(true);
        let use_case = use_case(&directory, StaticClientIdProvider::registered("alice"));

        assert_eq!(
            use_case.invoke().await,
            Err(RefillError::Network(NetworkFailure::NoConnection))
        );
    }

    #[test]
    fn rejects_limits_which_never_refill() {
        let directory = FakeDirectory::new();

        for fraction in [0.0, f32::NAN] {
            let result = KeyPackageCountUseCase::new(
                KeyPackageDataSource::new(directory.clone(), MemoryStore::new()),
                StaticClientIdProvider::registered("alice"),
                &KeyPackageRefillConfig::new().limits(KeyPackageLimits::new(100, fraction)),
            );
            assert!(matches!(
                result,
                Err(ConfigError::InvalidThresholdFraction(_))
            ));
        }
    }
}
