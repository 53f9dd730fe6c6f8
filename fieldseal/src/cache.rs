//! Caching key provider for remote key material.
//!
//! Remote sources (a KMS, a secrets service) are slow and can fail. The
//! [`CachingKeyProvider`] keeps the last fetched key set for a bounded TTL:
//!
//! - Fresh reads take a read lock just long enough to clone an `Arc`
//! - Refresh fetches outside any lock, then swaps the snapshot under a short write lock
//! - Only one thread refreshes at a time; others keep reading the expired snapshot
//! - A fetch that exceeds its deadline fails with `KeyProviderError::Timeout`
//! - At most one fetch is in flight; a timed-out fetch is kept and later
//!   callers wait on it or pick up its late result
//!
//! Fetched keys are immutable. A rotation shows up as a new key in the next snapshot.

use crate::error::KeyProviderError;
use crate::key::EncryptionKey;
use crate::key_provider::{order_candidates, KeyProvider, KeySelection};
use crate::message::EncryptedMessage;
use parking_lot::{Mutex, RwLock};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A remote origin of key material.
pub trait KeySource: Send + Sync + 'static {
    /// Fetches the current key set, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Unavailable` if the source cannot be reached.
    fn fetch_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError>;
}

/// Cache behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long a fetched key set is used before refreshing.
    pub ttl: Duration,
    /// Deadline for a single fetch.
    pub fetch_timeout: Duration,
    /// Keep serving the last key set when a refresh fails.
    pub serve_stale: bool,
    /// Which key encrypts new data.
    pub key_selection: KeySelection,
    /// Write the key tag into each message. Off by default, like
    /// [`EncryptionConfig::store_key_references`](crate::config::EncryptionConfig::store_key_references).
    pub store_key_references: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            serve_stale: false,
            key_selection: KeySelection::Newest,
            store_key_references: false,
        }
    }
}

type FetchResult = Result<Vec<EncryptionKey>, KeyProviderError>;

#[derive(Debug)]
struct KeySnapshot {
    keys: Vec<EncryptionKey>,
    fetched_at: Instant,
}

/// Key provider that caches keys fetched from a [`KeySource`].
pub struct CachingKeyProvider<S: KeySource> {
    source: Arc<S>,
    settings: CacheSettings,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    // Held by the refreshing thread; keeps the fetch that outlived its deadline.
    refresh: Mutex<Option<Receiver<FetchResult>>>,
}

impl<S: KeySource> CachingKeyProvider<S> {
    /// Creates a provider; nothing is fetched until the first key is needed.
    pub fn new(source: S, settings: CacheSettings) -> Self {
        Self {
            source: Arc::new(source),
            settings,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(None),
        }
    }

    /// Returns the cache settings.
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Drops the cached key set; the next call fetches again.
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    fn current(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot.read().clone()
    }

    fn is_fresh(&self, snapshot: &KeySnapshot) -> bool {
        snapshot.fetched_at.elapsed() < self.settings.ttl
    }

    fn keys(&self) -> Result<Arc<KeySnapshot>, KeyProviderError> {
        let cached = self.current();
        if let Some(snapshot) = &cached {
            if self.is_fresh(snapshot) {
                return Ok(Arc::clone(snapshot));
            }
        }

        let mut pending = match (self.refresh.try_lock(), cached) {
            (Some(guard), _) => guard,
            // Another thread is refreshing; keep using what we have.
            (None, Some(stale)) => return Ok(stale),
            (None, None) => self.refresh.lock(),
        };

        // Someone else may have refreshed while we waited for the lock.
        if let Some(snapshot) = self.current() {
            if self.is_fresh(&snapshot) {
                return Ok(snapshot);
            }
        }

        match self.fetch_with_timeout(&mut pending) {
            Ok(keys) => {
                debug!(count = keys.len(), "refreshed remote key set");
                let snapshot = Arc::new(KeySnapshot { keys, fetched_at: Instant::now() });
                *self.snapshot.write() = Some(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(err) => match self.current() {
                Some(stale) if self.settings.serve_stale => {
                    warn!(error = %err, "key refresh failed, serving cached keys");
                    Ok(stale)
                }
                _ => Err(err),
            },
        }
    }

    fn fetch_with_timeout(&self, pending: &mut Option<Receiver<FetchResult>>) -> FetchResult {
        let rx = match pending.take() {
            Some(rx) => {
                debug!("waiting on key fetch already in flight");
                rx
            }
            None => self.spawn_fetch()?,
        };

        let keys = match rx.recv_timeout(self.settings.fetch_timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                *pending = Some(rx);
                return Err(KeyProviderError::Timeout(self.settings.fetch_timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(KeyProviderError::Unavailable("key fetch aborted".to_string()))
            }
        };

        if keys.is_empty() {
            return Err(KeyProviderError::NoKeys);
        }
        Ok(keys)
    }

    fn spawn_fetch(&self) -> Result<Receiver<FetchResult>, KeyProviderError> {
        let source = Arc::clone(&self.source);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("fieldseal-key-fetch".to_string())
            .spawn(move || {
                // The receiver is gone if the provider was dropped meanwhile.
                let _ = tx.send(source.fetch_keys());
            })
            .map_err(|e| KeyProviderError::Unavailable(format!("cannot spawn fetch: {e}")))?;

        Ok(rx)
    }
}

impl<S: KeySource> KeyProvider for CachingKeyProvider<S> {
    fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError> {
        let snapshot = self.keys()?;
        self.settings.key_selection.pick(&snapshot.keys).cloned().ok_or(KeyProviderError::NoKeys)
    }

    fn decryption_keys(
        &self,
        message: &EncryptedMessage,
    ) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        let snapshot = self.keys()?;
        Ok(order_candidates(&snapshot.keys, message.key_tag()))
    }

    fn query_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        let snapshot = self.keys()?;
        Ok(order_candidates(&snapshot.keys, None))
    }

    fn stores_key_references(&self) -> bool {
        self.settings.store_key_references
    }
}
