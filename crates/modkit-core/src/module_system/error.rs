//! # Modkit Module System Errors
//!
//! Defines [`ModuleSystemError`], the error taxonomy of the module host:
//! unknown modules, no-op state transitions, dependency violations, circular
//! graphs, and the install/update failure families. Leaf enums owned by the
//! individual components ([`DependencyError`], [`InstallError`],
//! [`UpdateError`], ...) are wrapped transparently so their messages reach
//! the caller unchanged.
use crate::module_system::backup::BackupError;
use crate::module_system::dependency::DependencyError;
use crate::module_system::hooks::SchemaHookError;
use crate::module_system::installer::InstallError;
use crate::module_system::lock::LockError;
use crate::module_system::manifest::ManifestError;
use crate::module_system::release::ReleaseError;
use crate::module_system::updater::UpdateError;
use crate::module_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum ModuleSystemError {
    #[error("Module not found: '{0}'")]
    ModuleNotFound(String),

    #[error("Module '{0}' is already enabled")]
    AlreadyEnabled(String),

    #[error("Module '{0}' is already disabled")]
    AlreadyDisabled(String),

    #[error("Module '{module}' requires module '{dependency}', which is missing or not enabled")]
    MissingDependency { module: String, dependency: String },

    #[error("Module '{module}' requires '{dependency}' version '{required}', but found '{current}'")]
    DependencyVersionMismatch {
        module: String,
        dependency: String,
        required: String,
        current: String,
    },

    #[error("Cannot disable module '{module}': enabled modules depend on it: {}", .dependents.join(", "))]
    EnabledDependents { module: String, dependents: Vec<String> },

    #[error("Cannot remove module '{module}': other modules depend on it: {}", .dependents.join(", "))]
    HasDependents { module: String, dependents: Vec<String> },

    #[error("Module '{0}' must be disabled before it can be removed")]
    StillEnabled(String),

    #[error("Invalid module name '{name}': {reason}")]
    InvalidModuleName { name: String, reason: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Schema changes failed for module '{module}': {source}")]
    SchemaHook {
        module: String,
        #[source]
        source: SchemaHookError,
    },

    #[error("Module registration error for '{module}': {message}")]
    RegistrationError { module: String, message: String },

    #[error("Capability conflict: {kind} '{key}' is already registered by module '{owner}'")]
    CapabilityConflict {
        kind: &'static str,
        key: String,
        owner: String,
    },

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Internal module system error: {0}")]
    InternalError(String),
}

impl ModuleSystemError {
    /// Shorthand for [`ModuleSystemError::ModuleNotFound`].
    pub fn not_found(name: impl Into<String>) -> Self {
        ModuleSystemError::ModuleNotFound(name.into())
    }
}
