// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Mutex, MutexGuard};

use keyfill_core::traits::{KeyPackageStore, PreKeyStore};
use keyfill_core::{PreKeyId, StorageFailure, Timestamp};
use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

#[derive(Debug, Default)]
struct Bookkeeping {
    most_recent_prekey_id: Option<PreKeyId>,
    last_key_package_count_check: Option<Timestamp>,
    #[cfg(any(test, feature = "test_utils"))]
    unavailable: bool,
}

impl Bookkeeping {
    #[cfg(any(test, feature = "test_utils"))]
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    #[cfg(not(any(test, feature = "test_utils")))]
    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory bookkeeping for one identity.
///
/// This does not persist data permanently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
///
/// Clones share the same underlying state.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Bookkeeping>>,
    last_prekey_upload: Arc<watch::Sender<Option<Timestamp>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (last_prekey_upload, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(Bookkeeping::default())),
            last_prekey_upload: Arc::new(last_prekey_upload),
        }
    }

    /// Makes every following read and write fail until switched back.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    fn read(&self, what: &'static str) -> Result<MutexGuard<'_, Bookkeeping>, StorageFailure> {
        let inner = self.inner.lock().map_err(|_| StorageFailure::Read(what))?;
        if !inner.is_available() {
            return Err(StorageFailure::Read(what));
        }
        Ok(inner)
    }

    fn write(&self, what: &'static str) -> Result<MutexGuard<'_, Bookkeeping>, StorageFailure> {
        let inner = self.inner.lock().map_err(|_| StorageFailure::Write(what))?;
        if !inner.is_available() {
            return Err(StorageFailure::Write(what));
        }
        Ok(inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

const MOST_RECENT_PREKEY_ID: &str = "most recent pre-key id";
const LAST_PREKEY_UPLOAD: &str = "last pre-key upload instant";
const LAST_KEY_PACKAGE_COUNT_CHECK: &str = "last key package count check";

impl PreKeyStore for MemoryStore {
    async fn most_recent_prekey_id(&self) -> Result<Option<PreKeyId>, StorageFailure> {
        Ok(self.read(MOST_RECENT_PREKEY_ID)?.most_recent_prekey_id)
    }

    async fn update_most_recent_prekey_id(&self, id: PreKeyId) -> Result<(), StorageFailure> {
        self.write(MOST_RECENT_PREKEY_ID)?.most_recent_prekey_id = Some(id);
        trace!("most recent pre-key id set to {id}");
        Ok(())
    }

    async fn last_prekey_upload_instant(&self) -> Result<Option<Timestamp>, StorageFailure> {
        // The guard only checks availability, the value itself lives in the watch channel.
        let _inner = self.read(LAST_PREKEY_UPLOAD)?;
        Ok(*self.last_prekey_upload.borrow())
    }

    async fn set_last_prekey_upload_instant(
        &self,
        instant: Timestamp,
    ) -> Result<(), StorageFailure> {
        let _inner = self.write(LAST_PREKEY_UPLOAD)?;
        self.last_prekey_upload.send_replace(Some(instant));
        Ok(())
    }

    fn observe_last_prekey_upload_instant(
        &self,
    ) -> impl Stream<Item = Option<Timestamp>> + Send + Unpin + 'static {
        WatchStream::new(self.last_prekey_upload.subscribe())
    }
}

impl KeyPackageStore for MemoryStore {
    async fn last_key_package_count_check(&self) -> Result<Option<Timestamp>, StorageFailure> {
        Ok(self
            .read(LAST_KEY_PACKAGE_COUNT_CHECK)?
            .last_key_package_count_check)
    }

    async fn update_last_key_package_count_check(
        &self,
        instant: Timestamp,
    ) -> Result<(), StorageFailure> {
        self.write(LAST_KEY_PACKAGE_COUNT_CHECK)?
            .last_key_package_count_check = Some(instant);
        Ok(())
    }
}
