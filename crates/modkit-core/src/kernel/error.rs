//! # Modkit Kernel Errors
//!
//! Defines the top-level error type of the modkit core.
//!
//! Every subsystem owns a typed error enum ([`ModuleSystemError`],
//! [`StorageSystemError`], [`EventSystemError`]); this module rolls them up
//! into [`Error`] so that callers only need to match on one type, and
//! provides the crate-wide [`Result`] alias.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::event::EventSystemError;
use crate::module_system::backup::BackupError;
use crate::module_system::dependency::DependencyError;
use crate::module_system::error::ModuleSystemError;
use crate::module_system::installer::InstallError;
use crate::module_system::lock::LockError;
use crate::module_system::manifest::ManifestError;
use crate::module_system::release::ReleaseError;
use crate::module_system::updater::UpdateError;
use crate::module_system::version::VersionError;
use crate::storage::error::StorageSystemError;

/// Custom error type for the modkit core
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed module system error
    #[error("Module system error: {0}")]
    ModuleSystem(#[from] ModuleSystemError),

    /// Specific, typed storage system error (I/O, configuration)
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Event dispatch error
    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

// Code should prefer `Error::io` so the operation and path are recorded.
impl From<std::io::Error> for Error {
    fn from(io_err: std::io::Error) -> Self {
        Error::StorageSystem(StorageSystemError::Io {
            source: io_err,
            path: PathBuf::new(),
            operation: "unknown".to_string(),
        })
    }
}

// Leaf errors of the module system convert through `ModuleSystemError`
// so `?` works from any layer.
macro_rules! via_module_system {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Error::ModuleSystem(ModuleSystemError::from(err))
                }
            }
        )*
    };
}

via_module_system!(
    DependencyError,
    VersionError,
    InstallError,
    UpdateError,
    ReleaseError,
    BackupError,
    LockError,
    ManifestError,
);

impl Error {
    /// Helper to create an I/O error with context
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::StorageSystem(StorageSystemError::Io {
            source,
            operation: operation.into(),
            path: path.into(),
        })
    }

    /// Returns the module system error carried by this error, if any.
    pub fn as_module_error(&self) -> Option<&ModuleSystemError> {
        match self {
            Error::ModuleSystem(err) => Some(err),
            _ => None,
        }
    }

    /// True when the error reports an unknown module or backup.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.as_module_error(),
            Some(ModuleSystemError::ModuleNotFound(_))
                | Some(ModuleSystemError::Backup(BackupError::NotFound(_)))
        )
    }
}
