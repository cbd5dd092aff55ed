// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes for every collaborator at the boundary of the refill logic.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::Stream;
use keyfill_core::traits::{
    ClientIdProvider, KeyPackageApi, MlsCryptoProvider, PreKeyApi, PreKeyRepository,
    ProteusCryptoProvider,
};
use keyfill_core::{
    ClientId, Clock, CryptoProviderFailure, KeyPackage, KeyPackageCount, NetworkFailure,
    PreKeyId, PreKeyMaterial, RefillError, StorageFailure, Timestamp,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::sync::{Notify, watch};
use tokio_stream::wrappers::WatchStream;

use crate::RefillOutcome;
use crate::scheduler::ScheduledRefill;

/// 2023-11-14T22:13:20Z, used as "now" at the start of every test.
pub const TEST_EPOCH: Timestamp = Timestamp::new(1_700_000_000_000_000);

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wall clock which moves with tokio's time.
///
/// In tests with paused time the clock advances together with `tokio::time::advance` and
/// auto-advancing sleeps, so persisted timestamps and scheduler timers agree with each other.
#[derive(Clone, Debug)]
pub struct TokioClock {
    anchor: Timestamp,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor: Timestamp) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new(TEST_EPOCH)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.anchor + self.started.elapsed()
    }
}

/// Calls made against a [`FakePreKeyRepository`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreKeyCall {
    RemotelyAvailable,
    MostRecent,
    Generate { start: PreKeyId, count: u16 },
    Upload { ids: Vec<PreKeyId> },
    UpdateMostRecent(PreKeyId),
}

#[derive(Debug)]
struct PreKeyRepositoryState {
    remote_ids: Result<HashSet<PreKeyId>, NetworkFailure>,
    most_recent: Result<Option<PreKeyId>, StorageFailure>,
    generated: Option<Result<Vec<PreKeyMaterial>, CryptoProviderFailure>>,
    upload: Result<(), NetworkFailure>,
    update: Result<(), StorageFailure>,
    calls: Vec<PreKeyCall>,
}

/// Scriptable pre-key repository recording every call made against it.
///
/// By default the server holds no pre-keys, we never uploaded any and generation returns
/// consecutive ids as requested.
#[derive(Clone, Debug)]
pub struct FakePreKeyRepository {
    state: Arc<Mutex<PreKeyRepositoryState>>,
    last_upload: Arc<watch::Sender<Option<Timestamp>>>,
}

impl FakePreKeyRepository {
    pub fn new() -> Self {
        let (last_upload, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(PreKeyRepositoryState {
                remote_ids: Ok(HashSet::new()),
                most_recent: Ok(None),
                generated: None,
                upload: Ok(()),
                update: Ok(()),
                calls: Vec::new(),
            })),
            last_upload: Arc::new(last_upload),
        }
    }

    /// Pretend the server still holds `count` unclaimed pre-keys.
    pub fn with_remote_count(self, count: u16) -> Self {
        lock(&self.state).remote_ids = Ok((0..count).collect());
        self
    }

    pub fn with_most_recent(self, id: PreKeyId) -> Self {
        lock(&self.state).most_recent = Ok(Some(id));
        self
    }

    /// Generation returns pre-keys with exactly these ids, whatever was requested.
    pub fn with_generated_ids(self, ids: &[PreKeyId]) -> Self {
        let batch = ids
            .iter()
            .map(|id| PreKeyMaterial::new(*id, id.to_be_bytes().to_vec()))
            .collect();
        lock(&self.state).generated = Some(Ok(batch));
        self
    }

    pub fn fail_remote_count(self, err: NetworkFailure) -> Self {
        lock(&self.state).remote_ids = Err(err);
        self
    }

    pub fn fail_most_recent(self, err: StorageFailure) -> Self {
        lock(&self.state).most_recent = Err(err);
        self
    }

    pub fn fail_generation(self, err: CryptoProviderFailure) -> Self {
        lock(&self.state).generated = Some(Err(err));
        self
    }

    pub fn fail_upload(self, err: NetworkFailure) -> Self {
        lock(&self.state).upload = Err(err);
        self
    }

    pub fn fail_update(self, err: StorageFailure) -> Self {
        lock(&self.state).update = Err(err);
        self
    }

    pub fn calls(&self) -> Vec<PreKeyCall> {
        lock(&self.state).calls.clone()
    }

    fn record(&self, call: PreKeyCall) -> MutexGuard<'_, PreKeyRepositoryState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }
}

impl Default for FakePreKeyRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl PreKeyRepository for FakePreKeyRepository {
    async fn remotely_available_prekey_ids(&self) -> Result<HashSet<PreKeyId>, NetworkFailure> {
        self.record(PreKeyCall::RemotelyAvailable).remote_ids.clone()
    }

    async fn most_recent_prekey_id(&self) -> Result<Option<PreKeyId>, StorageFailure> {
        self.record(PreKeyCall::MostRecent).most_recent.clone()
    }

    async fn generate_new_prekeys(
        &self,
        start: PreKeyId,
        count: u16,
    ) -> Result<Vec<PreKeyMaterial>, CryptoProviderFailure> {
        let state = self.record(PreKeyCall::Generate { start, count });
        match &state.generated {
            Some(scripted) => scripted.clone(),
            None => Ok((0..count)
                .map(|offset| {
                    let id = start.wrapping_add(offset);
                    PreKeyMaterial::new(id, id.to_be_bytes().to_vec())
                })
                .collect()),
        }
    }

    async fn upload_new_prekey_batch(&self, batch: &[PreKeyMaterial]) -> Result<(), NetworkFailure> {
        let ids = batch.iter().map(PreKeyMaterial::id).collect();
        let mut state = self.record(PreKeyCall::Upload { ids });
        state.upload.clone()?;
        if let Ok(remote_ids) = state.remote_ids.as_mut() {
            remote_ids.extend(batch.iter().map(PreKeyMaterial::id));
        }
        Ok(())
    }

    async fn update_most_recent_prekey_id(&self, id: PreKeyId) -> Result<(), StorageFailure> {
        let mut state = self.record(PreKeyCall::UpdateMostRecent(id));
        state.update.clone()?;
        state.most_recent = Ok(Some(id));
        Ok(())
    }

    async fn last_prekey_upload_instant(&self) -> Result<Option<Timestamp>, StorageFailure> {
        Ok(*self.last_upload.borrow())
    }

    async fn set_last_prekey_upload_instant(&self, instant: Timestamp) -> Result<(), StorageFailure> {
        self.last_upload.send_replace(Some(instant));
        Ok(())
    }

    fn observe_last_prekey_upload_instant(
        &self,
    ) -> impl Stream<Item = Option<Timestamp>> + Send + Unpin + 'static {
        WatchStream::new(self.last_upload.subscribe())
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    prekeys: HashMap<ClientId, HashSet<PreKeyId>>,
    key_packages: HashMap<ClientId, Vec<KeyPackage>>,
    offline: bool,
    rejecting_uploads: bool,
    prekey_uploads: usize,
    key_package_count_requests: usize,
    key_package_uploads: usize,
}

/// Remote directory holding pre-keys and key packages of any number of clients.
#[derive(Clone, Debug, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests fail with [`NetworkFailure::NoConnection`] while offline.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Uploads fail with a server error while rejecting.
    pub fn set_rejecting_uploads(&self, rejecting: bool) {
        lock(&self.state).rejecting_uploads = rejecting;
    }

    pub fn set_prekeys(&self, client_id: &ClientId, ids: impl IntoIterator<Item = PreKeyId>) {
        lock(&self.state)
            .prekeys
            .insert(client_id.clone(), ids.into_iter().collect());
    }

    pub fn prekeys(&self, client_id: &ClientId) -> HashSet<PreKeyId> {
        lock(&self.state)
            .prekeys
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Another participant claims the pre-key with this id.
    pub fn claim_prekey(&self, client_id: &ClientId, id: PreKeyId) -> bool {
        lock(&self.state)
            .prekeys
            .get_mut(client_id)
            .is_some_and(|ids| ids.remove(&id))
    }

    pub fn set_key_packages(&self, client_id: &ClientId, count: usize) {
        let key_packages = (0..count)
            .map(|index| KeyPackage::from_bytes(index.to_be_bytes().to_vec()))
            .collect();
        lock(&self.state)
            .key_packages
            .insert(client_id.clone(), key_packages);
    }

    pub fn key_package_count(&self, client_id: &ClientId) -> usize {
        lock(&self.state)
            .key_packages
            .get(client_id)
            .map_or(0, Vec::len)
    }

    pub fn prekey_uploads(&self) -> usize {
        lock(&self.state).prekey_uploads
    }

    pub fn key_package_count_requests(&self) -> usize {
        lock(&self.state).key_package_count_requests
    }

    pub fn key_package_uploads(&self) -> usize {
        lock(&self.state).key_package_uploads
    }

    fn connect(&self) -> Result<MutexGuard<'_, DirectoryState>, NetworkFailure> {
        let state = lock(&self.state);
        if state.offline {
            return Err(NetworkFailure::NoConnection);
        }
        Ok(state)
    }

    fn check_upload(state: &DirectoryState) -> Result<(), NetworkFailure> {
        if state.rejecting_uploads {
            return Err(NetworkFailure::Server {
                status: 400,
                message: "bad-request".into(),
            });
        }
        Ok(())
    }
}

impl PreKeyApi for FakeDirectory {
    async fn remotely_available_prekey_ids(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<PreKeyId>, NetworkFailure> {
        let state = self.connect()?;
        Ok(state
            .prekeys
            .get(client_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn upload_prekeys(
        &self,
        client_id: &ClientId,
        batch: &[PreKeyMaterial],
    ) -> Result<(), NetworkFailure> {
        let mut state = self.connect()?;
        Self::check_upload(&state)?;
        state.prekey_uploads += 1;
        state
            .prekeys
            .entry(client_id.clone())
            .or_default()
            .extend(batch.iter().map(PreKeyMaterial::id));
        Ok(())
    }
}

impl KeyPackageApi for FakeDirectory {
    async fn available_key_package_count(
        &self,
        client_id: &ClientId,
    ) -> Result<KeyPackageCount, NetworkFailure> {
        let mut state = self.connect()?;
        state.key_package_count_requests += 1;
        let count = state.key_packages.get(client_id).map_or(0, Vec::len);
        Ok(KeyPackageCount::try_from(count).unwrap_or(KeyPackageCount::MAX))
    }

    async fn upload_key_packages(
        &self,
        client_id: &ClientId,
        batch: Vec<KeyPackage>,
    ) -> Result<(), NetworkFailure> {
        let mut state = self.connect()?;
        Self::check_upload(&state)?;
        state.key_package_uploads += 1;
        state
            .key_packages
            .entry(client_id.clone())
            .or_default()
            .extend(batch);
        Ok(())
    }
}

#[derive(Debug)]
struct CryptoState {
    rng: ChaCha20Rng,
    failure: Option<CryptoProviderFailure>,
    prekey_requests: Vec<(PreKeyId, u16)>,
    key_package_requests: Vec<u32>,
}

/// Crypto provider producing random but reproducible key material.
#[derive(Clone, Debug)]
pub struct FakeCrypto {
    state: Arc<Mutex<CryptoState>>,
}

impl FakeCrypto {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CryptoState {
                rng: ChaCha20Rng::seed_from_u64(seed),
                failure: None,
                prekey_requests: Vec::new(),
                key_package_requests: Vec::new(),
            })),
        }
    }

    /// Every following generation fails with `failure`, until reset with `None`.
    pub fn fail_with(&self, failure: Option<CryptoProviderFailure>) {
        lock(&self.state).failure = failure;
    }

    pub fn prekey_requests(&self) -> Vec<(PreKeyId, u16)> {
        lock(&self.state).prekey_requests.clone()
    }

    pub fn key_package_requests(&self) -> Vec<u32> {
        lock(&self.state).key_package_requests.clone()
    }

    fn random_bytes(rng: &mut ChaCha20Rng, len: usize) -> Vec<u8> {
        let mut bytes = vec![0; len];
        rng.fill_bytes(&mut bytes);
        bytes
    }
}

impl ProteusCryptoProvider for FakeCrypto {
    async fn new_prekeys(
        &self,
        start: PreKeyId,
        count: u16,
    ) -> Result<Vec<PreKeyMaterial>, CryptoProviderFailure> {
        let mut state = lock(&self.state);
        state.prekey_requests.push((start, count));
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        Ok((0..count)
            .map(|offset| {
                let payload = Self::random_bytes(&mut state.rng, 32);
                PreKeyMaterial::new(start.wrapping_add(offset), payload)
            })
            .collect())
    }
}

impl MlsCryptoProvider for FakeCrypto {
    async fn generate_key_packages(
        &self,
        _client_id: &ClientId,
        amount: u32,
    ) -> Result<Vec<KeyPackage>, CryptoProviderFailure> {
        let mut state = lock(&self.state);
        state.key_package_requests.push(amount);
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        Ok((0..amount)
            .map(|_| KeyPackage::from_bytes(Self::random_bytes(&mut state.rng, 64)))
            .collect())
    }
}

/// Client registration which never changes.
#[derive(Clone, Debug)]
pub struct StaticClientIdProvider {
    client_id: Option<ClientId>,
    mls_registered: bool,
    failing: bool,
}

impl StaticClientIdProvider {
    /// Registered client, including its MLS client.
    pub fn registered(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            mls_registered: true,
            failing: false,
        }
    }

    pub fn unregistered() -> Self {
        Self {
            client_id: None,
            mls_registered: false,
            failing: false,
        }
    }

    pub fn mls_registered(mut self, registered: bool) -> Self {
        self.mls_registered = registered;
        self
    }

    /// Every lookup fails with a storage failure.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    fn lookup(&self) -> Result<(), StorageFailure> {
        if self.failing {
            return Err(StorageFailure::Read("current client"));
        }
        Ok(())
    }
}

impl ClientIdProvider for StaticClientIdProvider {
    async fn current_client_id(&self) -> Result<Option<ClientId>, StorageFailure> {
        self.lookup()?;
        Ok(self.client_id.clone())
    }

    async fn has_registered_mls_client(&self) -> Result<bool, StorageFailure> {
        self.lookup()?;
        Ok(self.mls_registered)
    }
}

#[derive(Debug)]
struct RefillState {
    last_check: Option<Timestamp>,
    read_fails: bool,
    write_fails: bool,
    enabled: bool,
    held: bool,
    outcome: Result<RefillOutcome, RefillError>,
}

/// Refill task for scheduler tests, counting how often it ran.
#[derive(Clone, Debug)]
pub struct FakeRefill {
    min_interval: Duration,
    state: Arc<Mutex<RefillState>>,
    calls: Arc<AtomicUsize>,
    started: Arc<watch::Sender<usize>>,
    gate: Arc<Notify>,
}

impl FakeRefill {
    pub fn new(min_interval: Duration) -> Self {
        let (started, _) = watch::channel(0);
        Self {
            min_interval,
            state: Arc::new(Mutex::new(RefillState {
                last_check: None,
                read_fails: false,
                write_fails: false,
                enabled: true,
                held: false,
                outcome: Ok(RefillOutcome::NotNeeded { available: 100 }),
            })),
            calls: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(started),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn with_last_check(self, instant: Timestamp) -> Self {
        lock(&self.state).last_check = Some(instant);
        self
    }

    pub fn set_outcome(&self, outcome: Result<RefillOutcome, RefillError>) {
        lock(&self.state).outcome = outcome;
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.state).enabled = enabled;
    }

    pub fn set_last_check_unreadable(&self, fails: bool) {
        lock(&self.state).read_fails = fails;
    }

    pub fn set_last_check_unwritable(&self, fails: bool) {
        lock(&self.state).write_fails = fails;
    }

    /// Refills block until [`FakeRefill::release`] is called, once per refill.
    pub fn hold(&self) {
        lock(&self.state).held = true;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Number of refills which were started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` refills were started.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut started = self.started.subscribe();
        let _ = started.wait_for(|started| *started >= count).await;
    }

    pub fn persisted_last_check(&self) -> Option<Timestamp> {
        lock(&self.state).last_check
    }
}

impl ScheduledRefill for FakeRefill {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    async fn last_check(&self) -> Result<Option<Timestamp>, StorageFailure> {
        let state = lock(&self.state);
        if state.read_fails {
            return Err(StorageFailure::Read("last check"));
        }
        Ok(state.last_check)
    }

    async fn set_last_check(&self, instant: Timestamp) -> Result<(), StorageFailure> {
        let mut state = lock(&self.state);
        if state.write_fails {
            return Err(StorageFailure::Write("last check"));
        }
        state.last_check = Some(instant);
        Ok(())
    }

    async fn refill(&self) -> Result<RefillOutcome, RefillError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.send_replace(calls);

        let held = lock(&self.state).held;
        if held {
            self.gate.notified().await;
        }

        lock(&self.state).outcome.clone()
    }
}
