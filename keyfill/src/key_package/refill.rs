// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use keyfill_core::traits::{ClientIdProvider, KeyPackageRepository, MlsCryptoProvider};
use keyfill_core::{CryptoProviderFailure, RefillError, StorageFailure, Timestamp};
use tracing::{debug, info, warn};

use crate::RefillOutcome;
use crate::config::{ConfigError, KeyPackageRefillConfig};
use crate::key_package::count::KeyPackageCountUseCase;
use crate::scheduler::ScheduledRefill;

/// Uploads new key packages when the server runs low on them.
///
/// Missing key packages are generated by the MLS crypto provider, the amount brings the server
/// back up to the configured limit. Nothing is persisted here, the scheduler keeps track of when
/// we checked the last time.
#[derive(Debug)]
pub struct RefillKeyPackagesUseCase<K, M, I> {
    count: KeyPackageCountUseCase<K, I>,
    crypto: M,
    min_interval: Duration,
}

impl<K, M, I> RefillKeyPackagesUseCase<K, M, I>
where
    K: KeyPackageRepository,
    M: MlsCryptoProvider,
    I: ClientIdProvider,
{
    pub fn new(
        repository: K,
        crypto: M,
        client_ids: I,
        config: KeyPackageRefillConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            count: KeyPackageCountUseCase::new(repository, client_ids, &config)?,
            crypto,
            min_interval: config.min_interval,
        })
    }

    pub fn repository(&self) -> &K {
        self.count.repository()
    }

    pub async fn invoke(&self) -> Result<RefillOutcome, RefillError> {
        let status = self.count.invoke().await?;

        if !status.needs_refill {
            debug!(
                "{} key packages available on server, no refill needed",
                status.count
            );
            return Ok(RefillOutcome::NotNeeded {
                available: status.count,
            });
        }

        let amount = self.count.limits().refill_amount(status.count);
        debug!(
            "only {} key packages available on server, generating {}",
            status.count, amount
        );

        let batch = self
            .crypto
            .generate_key_packages(&status.client_id, amount)
            .await?;
        if batch.is_empty() {
            return Err(CryptoProviderFailure::EmptyBatch.into());
        }
        let generated = u32::try_from(batch.len()).unwrap_or(u32::MAX);

        self.count
            .repository()
            .upload_new_key_packages(&status.client_id, batch)
            .await?;
        info!(
            "uploaded {} new key packages for client {}",
            generated, status.client_id
        );

        Ok(RefillOutcome::Refilled {
            available: status.count,
            generated,
        })
    }
}

impl<K, M, I> ScheduledRefill for RefillKeyPackagesUseCase<K, M, I>
where
    K: KeyPackageRepository + 'static,
    M: MlsCryptoProvider + 'static,
    I: ClientIdProvider + 'static,
{
    fn name(&self) -> &'static str {
        "mls"
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn is_enabled(&self) -> bool {
        if !self.count.mls_supported() {
            return false;
        }

        match self.count.client_ids().has_registered_mls_client().await {
            Ok(registered) => registered,
            Err(err) => {
                warn!("could not look up mls client registration: {}", err);
                false
            }
        }
    }

    async fn last_check(&self) -> Result<Option<Timestamp>, StorageFailure> {
        self.repository().last_key_package_count_check().await
    }

    async fn set_last_check(&self, instant: Timestamp) -> Result<(), StorageFailure> {
        self.repository()
            .update_last_key_package_count_check(instant)
            .await
    }

    async fn refill(&self) -> Result<RefillOutcome, RefillError> {
        self.invoke().await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use keyfill_core::{ClientId, CryptoProviderFailure, NetworkFailure, RefillError};
    use keyfill_store::MemoryStore;

    use crate::RefillOutcome;
    use crate::config::KeyPackageRefillConfig;
    use crate::key_package::KeyPackageDataSource;
    use crate::policy::KeyPackageLimits;
    use crate::scheduler::ScheduledRefill;
    use crate::test_utils::{FakeCrypto, FakeDirectory, StaticClientIdProvider};

    use super::RefillKeyPackagesUseCase;

    type UseCase = RefillKeyPackagesUseCase<
        KeyPackageDataSource<FakeDirectory, MemoryStore>,
        FakeCrypto,
        StaticClientIdProvider,
    >;

    fn use_case(
        directory: &FakeDirectory,
        crypto: &FakeCrypto,
        client_ids: StaticClientIdProvider,
        config: KeyPackageRefillConfig,
    ) -> UseCase {
        RefillKeyPackagesUseCase::new(
            KeyPackageDataSource::new(directory.clone(), MemoryStore::new()),
            crypto.clone(),
            client_ids,
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn enough_key_packages() {
        let alice = ClientId::new("alice");
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);
        directory.set_key_packages(&alice, 50);

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::registered("alice"),
            KeyPackageRefillConfig::default(),
        );

        assert_eq!(
            use_case.invoke().await,
            Ok(RefillOutcome::NotNeeded { available: 50 })
        );
        assert!(crypto.key_package_requests().is_empty());
        assert_eq!(directory.key_package_uploads(), 0);
    }

    #[tokio::test]
    async fn refills_up_to_limit() {
        let alice = ClientId::new("alice");
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);
        directory.set_key_packages(&alice, 49);

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::registered("alice"),
            KeyPackageRefillConfig::default(),
        );

        assert_eq!(
            use_case.invoke().await,
            Ok(RefillOutcome::Refilled {
                available: 49,
                generated: 51
            })
        );
        assert_eq!(crypto.key_package_requests(), vec![51]);
        assert_eq!(directory.key_package_count(&alice), 100);
    }

    #[tokio::test]
    async fn lower_limits() {
        let alice = ClientId::new("alice");
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);
        directory.set_key_packages(&alice, 4);

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::registered("alice"),
            KeyPackageRefillConfig::new().limits(KeyPackageLimits::lower()),
        );

        use_case.invoke().await.unwrap();
        assert_eq!(crypto.key_package_requests(), vec![6]);
        assert_eq!(directory.key_package_count(&alice), 10);
    }

    #[tokio::test]
    async fn generation_failure_uploads_nothing() {
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);
        crypto.fail_with(Some(CryptoProviderFailure::NotSupported));

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::registered("alice"),
            KeyPackageRefillConfig::default(),
        );

        assert_eq!(
            use_case.invoke().await,
            Err(RefillError::CryptoProvider(
                CryptoProviderFailure::NotSupported
            ))
        );
        assert_eq!(directory.key_package_uploads(), 0);
    }

    #[tokio::test]
    async fn upload_failure_propagates() {
        let directory = FakeDirectory::new();
        directory.set_rejecting_uploads(true);
        let crypto = FakeCrypto::new(1);

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::registered("alice"),
            KeyPackageRefillConfig::default(),
        );

        assert_matches!(
            use_case.invoke().await,
            Err(RefillError::Network(NetworkFailure::Server { status: 400, .. }))
        );
        assert_eq!(crypto.key_package_requests(), vec![100]);
    }

    #[tokio::test]
    async fn missing_client_is_failure() {
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);

        let use_case = use_case(
            &directory,
            &crypto,
            StaticClientIdProvider::unregistered(),
            KeyPackageRefillConfig::default(),
        );

        assert_eq!(
            use_case.invoke().await,
            Err(RefillError::MissingClientRegistration)
        );
        assert_eq!(directory.key_package_count_requests(), 0);
    }

    #[tokio::test]
    async fn gated_on_mls_support_and_registration() {
        let directory = FakeDirectory::new();
        let crypto = FakeCrypto::new(1);
        let registered = StaticClientIdProvider::registered("alice");

        let enabled = use_case(
            &directory,
            &crypto,
            registered.clone(),
            KeyPackageRefillConfig::default(),
        );
        assert!(enabled.is_enabled().await);

        let unsupported = use_case(
            &directory,
            &crypto,
            registered.clone(),
            KeyPackageRefillConfig::new().mls_supported(false),
        );
        assert!(!unsupported.is_enabled().await);

        let unregistered = use_case(
            &directory,
            &crypto,
            registered.clone().mls_registered(false),
            KeyPackageRefillConfig::default(),
        );
        assert!(!unregistered.is_enabled().await);

        let failing = use_case(
            &directory,
            &crypto,
            registered.failing(),
            KeyPackageRefillConfig::default(),
        );
        assert!(!failing.is_enabled().await);
    }
}
