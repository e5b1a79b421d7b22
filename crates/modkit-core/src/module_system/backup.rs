//! Retention-bounded ZIP snapshots of module directories.
//!
//! Backups live flat in one directory and are named
//! `{module}__{version}__{timestamp}.zip`; listing is a directory scan, there
//! is no separate index.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::module_system::archive::{self, ArchiveError};
use crate::utils::fs::replace_dir;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";
const SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup file not found: {0}")]
    NotFound(PathBuf),

    #[error("Backup archive '{path}' failed: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("Backup I/O failed during '{operation}' on '{path}': {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup task failed: {0}")]
    Task(String),
}

impl BackupError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        BackupError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub module: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Percent-encodes everything outside `[A-Za-z0-9.-]`, so a name part
/// never contains the separator and decodes back to the original.
fn encode_name_part(part: &str) -> String {
    let mut encoded = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_name_part(part: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(part.len());
    let mut rest = part.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Splits `{module}__{version}__{timestamp}.zip`
fn parse_backup_name(file_name: &str) -> Option<(String, String, DateTime<Utc>)> {
    let stem = file_name.strip_suffix(".zip")?;
    let mut parts = stem.splitn(3, SEPARATOR);
    let module = decode_name_part(parts.next()?)?;
    let version = decode_name_part(parts.next()?)?;
    let created = NaiveDateTime::parse_from_str(parts.next()?, TIMESTAMP_FORMAT).ok()?;
    Some((module, version, created.and_utc()))
}

async fn run_blocking<T, F>(f: F) -> Result<T, BackupError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackupError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    /// Backups kept per module; 0 keeps everything
    retention: usize,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Zips `module_dir` into the store and prunes backups beyond retention.
    pub async fn create_backup(&self, module: &str, version: &str, module_dir: &Path) -> Result<BackupInfo, BackupError> {
        if !module_dir.is_dir() {
            return Err(BackupError::NotFound(module_dir.to_path_buf()));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackupError::io("create_backup_dir", &self.root, e))?;

        let mut created_at = Utc::now();
        let mut path = self.backup_path(module, version, created_at);
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            created_at += Duration::microseconds(1);
            path = self.backup_path(module, version, created_at);
        }

        let (src, dest) = (module_dir.to_path_buf(), path.clone());
        run_blocking(move || {
            archive::zip_directory(&src, &dest).map_err(|source| {
                let _ = std::fs::remove_file(&dest);
                BackupError::Archive {
                    path: dest.clone(),
                    source,
                }
            })
        })
        .await?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| BackupError::io("stat_backup", &path, e))?
            .len();
        log::info!("Created backup of module '{}' {} at {}", module, version, path.display());

        let removed = self.cleanup(module).await?;
        if removed > 0 {
            log::debug!("Pruned {} old backup(s) of module '{}'", removed, module);
        }

        let (module, version, created_at) = parse_backup_name(&file_name(&path))
            .unwrap_or((module.to_string(), version.to_string(), created_at));
        Ok(BackupInfo {
            path,
            module,
            version,
            created_at,
            size,
        })
    }

    fn backup_path(&self, module: &str, version: &str, at: DateTime<Utc>) -> PathBuf {
        self.root.join(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}.zip",
            encode_name_part(module),
            encode_name_part(version),
            at.format(TIMESTAMP_FORMAT)
        ))
    }

    /// Backups of `module`, newest first.
    pub async fn list_backups(&self, module: &str) -> Result<Vec<BackupInfo>, BackupError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io("list_backups", &self.root, e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::io("list_backups", &self.root, e))?
        {
            let path = entry.path();
            let Some((owner, version, created_at)) = parse_backup_name(&file_name(&path)) else {
                continue;
            };
            if owner != module {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                path,
                module: owner,
                version,
                created_at,
                size,
            });
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.path.cmp(&a.path)));
        Ok(backups)
    }

    /// Total size in bytes of all backups of `module`
    pub async fn backup_size(&self, module: &str) -> Result<u64, BackupError> {
        Ok(self.list_backups(module).await?.iter().map(|b| b.size).sum())
    }

    pub async fn delete_backup(&self, path: &Path) -> Result<(), BackupError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                log::info!("Deleted backup {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackupError::NotFound(path.to_path_buf())),
            Err(e) => Err(BackupError::io("delete_backup", path, e)),
        }
    }

    /// Deletes the oldest backups beyond the retention limit; returns how
    /// many were removed.
    pub async fn cleanup(&self, module: &str) -> Result<usize, BackupError> {
        if self.retention == 0 {
            return Ok(0);
        }
        let backups = self.list_backups(module).await?;
        let mut removed = 0;
        for stale in backups.iter().skip(self.retention) {
            self.delete_backup(&stale.path).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Replaces `module_dir` with the contents of `backup`.
    pub async fn restore_backup(&self, backup: &Path, module_dir: &Path) -> Result<(), BackupError> {
        if !tokio::fs::try_exists(backup).await.unwrap_or(false) {
            return Err(BackupError::NotFound(backup.to_path_buf()));
        }

        let (backup, module_dir) = (backup.to_path_buf(), module_dir.to_path_buf());
        run_blocking(move || {
            let parent = module_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&parent).map_err(|e| BackupError::io("create_module_parent", &parent, e))?;
            let staging = tempfile::Builder::new()
                .prefix(".modkit-restore-")
                .tempdir_in(&parent)
                .map_err(|e| BackupError::io("create_restore_dir", &parent, e))?;

            let archive_err = |source| BackupError::Archive {
                path: backup.clone(),
                source,
            };
            let mut zip = archive::open_zip(&backup).map_err(archive_err)?;
            archive::extract_zip(&mut zip, staging.path()).map_err(archive_err)?;

            replace_dir(staging.path(), &module_dir).map_err(|e| BackupError::io("swap_module_dir", &module_dir, e))?;
            log::info!("Restored {} from backup {}", module_dir.display(), backup.display());
            Ok(())
        })
        .await
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
