//! Named advisory locks with a bounded lease.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::kernel::constants::DEFAULT_LOCK_LEASE_SECS;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock '{0}' is held by another operation")]
    Held(String),

    #[error("Lock store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Proof of ownership returned by [`LockStore::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(Uuid);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lock key guarding one module (`module:{name}`)
pub fn module_lock_key(name: &str) -> String {
    format!("module:{}", name)
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Takes the lock for `lease`. Fails with [`LockError::Held`] when an
    /// unexpired lease exists.
    async fn acquire(&self, key: &str, lease: Duration) -> Result<LockToken, LockError>;

    /// Releases the lock if `token` still owns it; returns whether it did
    async fn release(&self, key: &str, token: LockToken) -> Result<bool, LockError>;

    /// Releases the lock whoever owns it; returns whether one was held
    async fn force_release(&self, key: &str) -> Result<bool, LockError>;

    async fn is_locked(&self, key: &str) -> Result<bool, LockError>;
}

fn expiry_after(lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1));
    Utc::now() + lease
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: LockToken,
    expires_at: DateTime<Utc>,
}

impl Lease {
    fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &str, lease: Duration) -> Result<LockToken, LockError> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(Lease::is_live) {
            return Err(LockError::Held(key.to_string()));
        }
        let token = LockToken::generate();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: expiry_after(lease),
            },
        );
        Ok(token)
    }

    async fn release(&self, key: &str, token: LockToken) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|l| l.token == token) {
            leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.leases.lock().await.remove(key).is_some())
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.leases.lock().await.get(key).is_some_and(Lease::is_live))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockFile {
    key: String,
    token: LockToken,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// How long takeover and release wait for the guard of a key
const GUARD_WAIT: Duration = Duration::from_secs(5);

/// A guard file older than this was left behind by a crashed process
const GUARD_STALE: Duration = Duration::from_secs(30);

// What a lock path currently holds
enum LockState {
    Missing,
    Written(LockFile),
    /// Content that does not parse; judged by its modification time
    Unreadable { modified: SystemTime },
}

impl LockState {
    fn is_live(&self, lease: Duration) -> bool {
        match self {
            LockState::Missing => false,
            LockState::Written(lock) => lock.expires_at > Utc::now(),
            LockState::Unreadable { modified } => modified.elapsed().map_or(true, |age| age < lease),
        }
    }

    fn token(&self) -> Option<LockToken> {
        match self {
            LockState::Written(lock) => Some(lock.token),
            _ => None,
        }
    }
}

fn read_state(path: &Path) -> io::Result<LockState> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockState::Missing),
        Err(e) => return Err(e),
    };
    if let Ok(lock) = serde_json::from_slice::<LockFile>(&content) {
        return Ok(LockState::Written(lock));
    }
    match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => Ok(LockState::Unreadable { modified }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LockState::Missing),
        Err(e) => Err(e),
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Exclusive right to replace or delete an existing lock file.
struct Guard {
    path: PathBuf,
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            log::warn!("Failed to remove lock guard {}: {}", self.path.display(), e);
        }
    }
}

/// One lock file per key.
///
/// Lock files are written to a temp file and published with a no-clobber
/// link, so a lock file is never observed half-written. Replacing or
/// deleting an existing lock file (expired takeover, release) happens under
/// a per-key guard file. Unparsable lock files count as held until their
/// modification time is older than [`FileLockStore::with_stale_after`].
#[derive(Debug, Clone)]
pub struct FileLockStore {
    dir: PathBuf,
    stale_after: Duration,
}

impl FileLockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: Duration::from_secs(DEFAULT_LOCK_LEASE_SECS),
        }
    }

    /// Age after which an unparsable lock file no longer counts as held
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_stem(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", Self::file_stem(key)))
    }

    fn guard_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.guard", Self::file_stem(key)))
    }

    /// Publishes a new lock file; `None` when one already exists.
    fn publish(&self, key: &str, lease: Duration) -> Result<Option<LockToken>, LockError> {
        let io_err = |source| LockError::Io { key: key.to_string(), source };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let lock = LockFile {
            key: key.to_string(),
            token: LockToken::generate(),
            acquired_at: Utc::now(),
            expires_at: expiry_after(lease),
        };
        let body = serde_json::to_vec(&lock).map_err(|e| io_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.write_all(&body).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        match temp.persist_noclobber(self.lock_path(key)) {
            Ok(_) => Ok(Some(lock.token)),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(io_err(e.error)),
        }
    }

    fn guard(&self, key: &str) -> Result<Guard, LockError> {
        let io_err = |source| LockError::Io { key: key.to_string(), source };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.guard_path(key);
        let deadline = Instant::now() + GUARD_WAIT;

        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Guard { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_err(e)),
            }

            let stale = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > GUARD_STALE);
            if stale {
                log::warn!("Removing abandoned lock guard {}", path.display());
                remove_if_present(&path).map_err(io_err)?;
                continue;
            }
            if Instant::now() >= deadline {
                return Err(LockError::Held(key.to_string()));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn acquire_blocking(&self, key: &str, lease: Duration) -> Result<LockToken, LockError> {
        let io_err = |source| LockError::Io { key: key.to_string(), source };
        if let Some(token) = self.publish(key, lease)? {
            return Ok(token);
        }

        let path = self.lock_path(key);
        if read_state(&path).map_err(io_err)?.is_live(self.stale_after) {
            return Err(LockError::Held(key.to_string()));
        }

        // re-read under the guard: another caller may have taken over already
        let _guard = self.guard(key)?;
        let state = read_state(&path).map_err(io_err)?;
        if state.is_live(self.stale_after) {
            return Err(LockError::Held(key.to_string()));
        }
        if !matches!(state, LockState::Missing) {
            log::warn!("Taking over expired lock '{}'", key);
            remove_if_present(&path).map_err(io_err)?;
        }
        self.publish(key, lease)?
            .ok_or_else(|| LockError::Held(key.to_string()))
    }

    fn release_blocking(&self, key: &str, token: LockToken) -> Result<bool, LockError> {
        let io_err = |source| LockError::Io { key: key.to_string(), source };
        let path = self.lock_path(key);
        if read_state(&path).map_err(io_err)?.token() != Some(token) {
            return Ok(false);
        }

        let _guard = self.guard(key)?;
        if read_state(&path).map_err(io_err)?.token() != Some(token) {
            return Ok(false);
        }
        remove_if_present(&path).map_err(io_err)
    }

    fn force_release_blocking(&self, key: &str) -> Result<bool, LockError> {
        let _guard = self.guard(key)?;
        remove_if_present(&self.lock_path(key)).map_err(|source| LockError::Io { key: key.to_string(), source })
    }

    async fn run<T, F>(&self, key: &str, op: F) -> Result<T, LockError>
    where
        T: Send + 'static,
        F: FnOnce(FileLockStore, String) -> Result<T, LockError> + Send + 'static,
    {
        let (store, owned_key) = (self.clone(), key.to_string());
        tokio::task::spawn_blocking(move || op(store, owned_key))
            .await
            .map_err(|e| LockError::Io {
                key: key.to_string(),
                source: io::Error::other(e.to_string()),
            })?
    }
}

#[async_trait]
impl LockStore for FileLockStore {
    async fn acquire(&self, key: &str, lease: Duration) -> Result<LockToken, LockError> {
        self.run(key, move |store, key| store.acquire_blocking(&key, lease)).await
    }

    async fn release(&self, key: &str, token: LockToken) -> Result<bool, LockError> {
        self.run(key, move |store, key| store.release_blocking(&key, token)).await
    }

    async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        self.run(key, |store, key| store.force_release_blocking(&key)).await
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        self.run(key, |store, key| {
            let state = read_state(&store.lock_path(&key)).map_err(|source| LockError::Io { key: key.clone(), source })?;
            Ok(state.is_live(store.stale_after))
        })
        .await
    }
}
