// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use keyfill_core::traits::PreKeyRepository;
use keyfill_core::{CryptoProviderFailure, RefillError, StorageFailure, Timestamp, max_prekey_id};
use tracing::{debug, info};

use crate::RefillOutcome;
use crate::config::{ConfigError, ProteusRefillConfig};
use crate::policy::{needs_prekey_refill, prekey_start_id};
use crate::scheduler::ScheduledRefill;

/// Tops up the pre-keys the server holds for us.
///
/// One call to [`refill_if_needed`](Self::refill_if_needed) runs a complete cycle: count the
/// remote pre-keys, choose a safe id range, generate, upload and finally remember the highest
/// uploaded id. Any failure aborts the cycle without touching the persisted counter, the next
/// cycle starts over from the same id.
#[derive(Debug)]
pub struct ProteusPreKeyRefiller<R> {
    repository: R,
    config: ProteusRefillConfig,
}

impl<R> ProteusPreKeyRefiller<R>
where
    R: PreKeyRepository,
{
    pub fn new(repository: R, config: ProteusRefillConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { repository, config })
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &ProteusRefillConfig {
        &self.config
    }

    pub async fn refill_if_needed(&self) -> Result<RefillOutcome, RefillError> {
        let remote_ids = self.repository.remotely_available_prekey_ids().await?;
        let available = u32::try_from(remote_ids.len()).unwrap_or(u32::MAX);

        if !needs_prekey_refill(remote_ids.len(), self.config.low_on_prekeys_threshold) {
            debug!(
                "{} pre-keys available on server, no refill needed",
                available
            );
            return Ok(RefillOutcome::NotNeeded { available });
        }

        let count = self.config.remote_prekey_target_count;
        let most_recent = self.repository.most_recent_prekey_id().await?;
        let start = prekey_start_id(most_recent, count, self.config.max_prekey_id);
        debug!(
            "only {} pre-keys available on server, generating {} starting at id {} (most recent: {:?})",
            available, count, start, most_recent
        );

        let batch = self.repository.generate_new_prekeys(start, count).await?;
        let new_most_recent = max_prekey_id(&batch).ok_or(CryptoProviderFailure::EmptyBatch)?;

        self.repository.upload_new_prekey_batch(&batch).await?;

        // Only advance after the server confirmed the upload, otherwise ids could be skipped.
        self.repository
            .update_most_recent_prekey_id(new_most_recent)
            .await?;

        let generated = u32::try_from(batch.len()).unwrap_or(u32::MAX);
        info!(
            "uploaded {} new pre-keys, most recent id is now {}",
            generated, new_most_recent
        );

        Ok(RefillOutcome::Refilled {
            available,
            generated,
        })
    }
}

impl<R> ScheduledRefill for ProteusPreKeyRefiller<R>
where
    R: PreKeyRepository + 'static,
{
    fn name(&self) -> &'static str {
        "proteus"
    }

    fn min_interval(&self) -> Duration {
        self.config.min_interval
    }

    async fn last_check(&self) -> Result<Option<Timestamp>, StorageFailure> {
        self.repository.last_prekey_upload_instant().await
    }

    async fn set_last_check(&self, instant: Timestamp) -> Result<(), StorageFailure> {
        self.repository.set_last_prekey_upload_instant(instant).await
    }

    async fn refill(&self) -> Result<RefillOutcome, RefillError> {
        self.refill_if_needed().await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use keyfill_core::{CryptoProviderFailure, NetworkFailure, RefillError, StorageFailure};

    use crate::RefillOutcome;
    use crate::config::{ConfigError, ProteusRefillConfig};
    use crate::test_utils::{FakePreKeyRepository, PreKeyCall};

    use super::ProteusPreKeyRefiller;

    fn refiller(
        repository: &FakePreKeyRepository,
        config: ProteusRefillConfig,
    ) -> ProteusPreKeyRefiller<FakePreKeyRepository> {
        ProteusPreKeyRefiller::new(repository.clone(), config).unwrap()
    }

    #[tokio::test]
    async fn enough_prekeys_on_server() {
        let config = ProteusRefillConfig::new().low_on_prekeys_threshold(20);

        for remote_count in [20, 21, 100, 500] {
            let repository = FakePreKeyRepository::new().with_remote_count(remote_count);
            let outcome = refiller(&repository, config.clone())
                .refill_if_needed()
                .await;

            assert_eq!(
                outcome,
                Ok(RefillOutcome::NotNeeded {
                    available: u32::from(remote_count)
                })
            );
            assert_eq!(repository.calls(), vec![PreKeyCall::RemotelyAvailable]);
        }
    }

    #[tokio::test]
    async fn low_on_prekeys_generates_full_target() {
        let config = ProteusRefillConfig::new()
            .low_on_prekeys_threshold(20)
            .remote_prekey_target_count(100);

        for remote_count in [0, 1, 19] {
            let repository = FakePreKeyRepository::new()
                .with_remote_count(remote_count)
                .with_most_recent(200);
            let outcome = refiller(&repository, config.clone())
                .refill_if_needed()
                .await;

            assert_eq!(
                outcome,
                Ok(RefillOutcome::Refilled {
                    available: u32::from(remote_count),
                    generated: 100,
                })
            );
            let generate_calls: Vec<_> = repository
                .calls()
                .into_iter()
                .filter(|call| matches!(call, PreKeyCall::Generate { .. }))
                .collect();
            assert_eq!(
                generate_calls,
                vec![PreKeyCall::Generate {
                    start: 201,
                    count: 100
                }]
            );
        }
    }

    #[tokio::test]
    async fn full_cycle_in_order() {
        let repository = FakePreKeyRepository::new()
            .with_remote_count(3)
            .with_most_recent(50);
        let config = ProteusRefillConfig::new()
            .max_prekey_id(1000)
            .remote_prekey_target_count(3);

        refiller(&repository, config)
            .refill_if_needed()
            .await
            .unwrap();

        assert_eq!(
            repository.calls(),
            vec![
                PreKeyCall::RemotelyAvailable,
                PreKeyCall::MostRecent,
                PreKeyCall::Generate {
                    start: 51,
                    count: 3
                },
                PreKeyCall::Upload {
                    ids: vec![51, 52, 53]
                },
                PreKeyCall::UpdateMostRecent(53),
            ]
        );
    }

    #[tokio::test]
    async fn restarts_at_zero_when_id_space_runs_out() {
        // Only 10 ids left before reaching the maximum.
        let repository = FakePreKeyRepository::new().with_most_recent(90);
        let config = ProteusRefillConfig::new()
            .max_prekey_id(100)
            .remote_prekey_target_count(100);

        refiller(&repository, config)
            .refill_if_needed()
            .await
            .unwrap();

        assert!(repository.calls().contains(&PreKeyCall::Generate {
            start: 0,
            count: 100
        }));
        assert!(repository.calls().contains(&PreKeyCall::UpdateMostRecent(99)));
    }

    #[tokio::test]
    async fn continues_after_most_recent_id() {
        let repository = FakePreKeyRepository::new().with_most_recent(50);
        let config = ProteusRefillConfig::new()
            .max_prekey_id(1000)
            .remote_prekey_target_count(100);

        refiller(&repository, config)
            .refill_if_needed()
            .await
            .unwrap();

        assert!(repository.calls().contains(&PreKeyCall::Generate {
            start: 51,
            count: 100
        }));
        assert!(repository.calls().contains(&PreKeyCall::UpdateMostRecent(150)));
    }

    #[tokio::test]
    async fn first_refill_starts_after_zero() {
        let repository = FakePreKeyRepository::new();

        refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await
            .unwrap();

        assert!(repository.calls().contains(&PreKeyCall::Generate {
            start: 1,
            count: 100
        }));
    }

    #[tokio::test]
    async fn remembers_highest_generated_id() {
        let repository = FakePreKeyRepository::new().with_generated_ids(&[2, 10, 5]);

        refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await
            .unwrap();

        assert_eq!(
            repository.calls().last(),
            Some(&PreKeyCall::UpdateMostRecent(10))
        );
    }

    #[tokio::test]
    async fn generation_failure_aborts_cycle() {
        let repository =
            FakePreKeyRepository::new().fail_generation(CryptoProviderFailure::NotSupported);

        let result = refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await;

        assert_eq!(
            result,
            Err(RefillError::CryptoProvider(
                CryptoProviderFailure::NotSupported
            ))
        );
        assert_matches!(repository.calls().last(), Some(PreKeyCall::Generate { .. }));
    }

    #[tokio::test]
    async fn empty_batch_is_not_uploaded() {
        let repository = FakePreKeyRepository::new().with_generated_ids(&[]);

        let result = refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await;

        assert_eq!(
            result,
            Err(RefillError::CryptoProvider(CryptoProviderFailure::EmptyBatch))
        );
        assert_matches!(repository.calls().last(), Some(PreKeyCall::Generate { .. }));
    }

    #[tokio::test]
    async fn upload_failure_keeps_counter() {
        let repository = FakePreKeyRepository::new()
            .with_most_recent(7)
            .fail_upload(NetworkFailure::NoConnection);
        let refiller = refiller(&repository, ProteusRefillConfig::default());

        assert_eq!(
            refiller.refill_if_needed().await,
            Err(RefillError::Network(NetworkFailure::NoConnection))
        );
        assert_matches!(repository.calls().last(), Some(PreKeyCall::Upload { .. }));

        // The next cycle allocates the very same ids again.
        let _ = refiller.refill_if_needed().await;
        let starts: Vec<_> = repository
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                PreKeyCall::Generate { start, .. } => Some(start),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![8, 8]);
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let repository =
            FakePreKeyRepository::new().fail_most_recent(StorageFailure::Read("most recent"));
        let result = refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await;
        assert_eq!(
            result,
            Err(RefillError::Storage(StorageFailure::Read("most recent")))
        );
        assert_eq!(
            repository.calls(),
            vec![PreKeyCall::RemotelyAvailable, PreKeyCall::MostRecent]
        );

        // Upload went through, but remembering it did not.
        let repository =
            FakePreKeyRepository::new().fail_update(StorageFailure::Write("most recent"));
        let result = refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await;
        assert_eq!(
            result,
            Err(RefillError::Storage(StorageFailure::Write("most recent")))
        );
    }

    #[tokio::test]
    async fn network_failure_on_count() {
        let repository = FakePreKeyRepository::new().fail_remote_count(NetworkFailure::Server {
            status: 500,
            message: "internal".into(),
        });

        let result = refiller(&repository, ProteusRefillConfig::default())
            .refill_if_needed()
            .await;

        assert_matches!(
            result,
            Err(RefillError::Network(NetworkFailure::Server { status: 500, .. }))
        );
        assert_eq!(repository.calls(), vec![PreKeyCall::RemotelyAvailable]);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ProteusRefillConfig::new()
            .max_prekey_id(10)
            .remote_prekey_target_count(100);

        assert_matches!(
            ProteusPreKeyRefiller::new(FakePreKeyRepository::new(), config),
            Err(ConfigError::TargetExceedsIdSpace { .. })
        );
    }
}
