//! Installs modules from uploaded ZIP archives.
//!
//! Every step is a gate: the archive is size-checked, opened, extracted into
//! an isolated temp directory, its manifest validated, and only then moved
//! into the modules directory. The temp directory is removed whatever the
//! outcome.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::event::{ModuleEvent, SharedEventDispatcher};
use crate::kernel::constants::{DEFAULT_MAX_UPLOAD_SIZE, MODULE_MANIFEST_FILE, RESERVED_MODULE_NAMES};
use crate::kernel::error::{Error, Result};
use crate::module_system::archive::{self, ArchiveError};
use crate::module_system::error::ModuleSystemError;
use crate::module_system::manifest::{ManifestError, ModuleManifest};
use crate::module_system::module::ModuleName;
use crate::utils::fs::{dir_size, move_dir};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Archive is too large: {size} bytes (limit {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Uploaded file is not a valid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("module.json not found at the archive root or in its single top-level directory")]
    ManifestNotFound,

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    #[error("Invalid module name '{name}': {reason}")]
    InvalidModuleName { name: String, reason: String },

    #[error("Module name '{0}' is reserved")]
    ForbiddenName(String),

    #[error("A module named '{0}' already exists")]
    AlreadyExists(String),

    #[error("Failed to move module into '{path}': {source}")]
    MoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Installer I/O failed during '{operation}' on '{path}': {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        InstallError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A freshly installed module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    /// Bytes on disk after the move
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ModuleInstaller {
    modules_path: PathBuf,
    temp_root: Option<PathBuf>,
    max_upload_size: u64,
    forbidden_names: Vec<String>,
    events: SharedEventDispatcher,
}

impl ModuleInstaller {
    pub fn new(modules_path: impl Into<PathBuf>, events: SharedEventDispatcher) -> Self {
        Self {
            modules_path: modules_path.into(),
            temp_root: None,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            forbidden_names: RESERVED_MODULE_NAMES.iter().map(|n| n.to_string()).collect(),
            events,
        }
    }

    pub fn with_max_upload_size(mut self, max: u64) -> Self {
        self.max_upload_size = max;
        self
    }

    pub fn with_forbidden_names(mut self, names: Vec<String>) -> Self {
        self.forbidden_names = names;
        self
    }

    /// Extraction happens below this directory instead of the system temp dir
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn modules_path(&self) -> &Path {
        &self.modules_path
    }

    /// Case-insensitive check against the reserved names
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden_names.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Installs the module contained in the ZIP at `archive_path`.
    pub async fn install_from_zip(&self, archive_path: &Path) -> Result<InstalledModule> {
        let size = tokio::fs::metadata(archive_path)
            .await
            .map_err(|e| InstallError::io("stat_archive", archive_path, e))?
            .len();
        if size > self.max_upload_size {
            return Err(InstallError::FileTooLarge {
                size,
                max: self.max_upload_size,
            }
            .into());
        }

        let installer = self.clone();
        let archive_path = archive_path.to_path_buf();
        let installed = tokio::task::spawn_blocking(move || installer.install_blocking(&archive_path))
            .await
            .map_err(|e| Error::Other(format!("Install task failed: {}", e)))??;

        log::info!(
            "Installed module '{}' {} into {}",
            installed.name,
            installed.version,
            installed.path.display()
        );
        self.events
            .dispatch(&ModuleEvent::Installed {
                name: installed.name.clone(),
                version: installed.version.clone(),
                path: installed.path.clone(),
            })
            .await;
        Ok(installed)
    }

    fn install_blocking(&self, archive_path: &Path) -> std::result::Result<InstalledModule, InstallError> {
        let mut zip = archive::open_zip(archive_path).map_err(|e| match e {
            ArchiveError::Io(source) => InstallError::io("open_archive", archive_path, source),
            other => InstallError::InvalidArchive(other.to_string()),
        })?;

        let staging = self.staging_dir()?;
        archive::extract_zip(&mut zip, staging.path()).map_err(|e| match e {
            ArchiveError::Io(source) => InstallError::io("extract_archive", staging.path(), source),
            other => InstallError::InvalidArchive(other.to_string()),
        })?;

        let root = archive::locate_module_root(staging.path())
            .map_err(|e| InstallError::io("locate_manifest", staging.path(), e))?
            .ok_or(InstallError::ManifestNotFound)?;
        let manifest_path = root.join(MODULE_MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| InstallError::io("read_manifest", &manifest_path, e))?;
        let manifest = ModuleManifest::parse_strict(&content, &root)?;

        self.validate_name(&manifest.name)?;
        let destination = self.modules_path.join(&manifest.name);
        if destination.exists() {
            return Err(InstallError::AlreadyExists(manifest.name));
        }

        std::fs::create_dir_all(&self.modules_path)
            .map_err(|e| InstallError::io("create_modules_dir", &self.modules_path, e))?;
        move_dir(&root, &destination).map_err(|source| InstallError::MoveFailed {
            path: destination.clone(),
            source,
        })?;

        let size = dir_size(&destination).unwrap_or(0);
        Ok(InstalledModule {
            name: manifest.name,
            version: manifest.version,
            path: destination,
            size,
        })
    }

    fn validate_name(&self, name: &str) -> std::result::Result<(), InstallError> {
        if let Err(e) = ModuleName::parse(name) {
            let reason = match e {
                ModuleSystemError::InvalidModuleName { reason, .. } => reason,
                other => other.to_string(),
            };
            return Err(InstallError::InvalidModuleName {
                name: name.to_string(),
                reason,
            });
        }
        if self.is_forbidden(name) {
            return Err(InstallError::ForbiddenName(name.to_string()));
        }
        Ok(())
    }

    fn staging_dir(&self) -> std::result::Result<tempfile::TempDir, InstallError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("modkit-install-");
        match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| InstallError::io("create_temp_root", root, e))?;
                builder
                    .tempdir_in(root)
                    .map_err(|e| InstallError::io("create_staging_dir", root, e))
            }
            None => builder
                .tempdir()
                .map_err(|e| InstallError::io("create_staging_dir", &std::env::temp_dir(), e)),
        }
    }
}
