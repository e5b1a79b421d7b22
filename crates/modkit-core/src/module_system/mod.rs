//! # Modkit Module System
//!
//! Discovery, dependency resolution, lifecycle, installation and
//! self-update of feature modules.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`version`]**: lenient semantic versions and constraint matching
//!   (`^`, `~`, comparison operators, bare equality).
//! - **[`manifest`]** / **[`module`]**: the `module.json` descriptor and the
//!   persisted [`Module`] record.
//! - **[`discovery`]**: scans the modules directory for manifests.
//! - **[`dependency`]**: satisfaction checks, cycle detection, topological
//!   ordering and dependents lookup.
//! - **[`repository`]**: the persisted module store.
//! - **[`manager`]**: enable/disable/uninstall under the dependency
//!   invariants ([`ModuleManager`]).
//! - **[`installer`]** / **[`scaffold`]**: new modules from uploaded ZIP
//!   archives or generated skeletons.
//! - **[`updater`]**: locked, backed-up, health-checked updates from remote
//!   releases, built on [`release`], [`integrity`], [`backup`], [`health`]
//!   and [`lock`].
//! - **[`capabilities`]**: the registries enabled modules contribute to.
//! - **[`hooks`]**: the schema-apply hook and enabled-modules cache seams.
pub mod archive;
pub mod backup;
pub mod capabilities;
pub mod dependency;
pub mod discovery;
pub mod error;
pub mod health;
pub mod hooks;
pub mod installer;
pub mod integrity;
pub mod lock;
pub mod manager;
pub mod manifest;
pub mod module;
pub mod release;
pub mod repository;
pub mod scaffold;
pub mod updater;
pub mod version;

pub use capabilities::{CapabilityRegistry, ModuleContributor};
pub use dependency::{DependencyCheckResult, DependencyResolver};
pub use discovery::ModuleDiscovery;
pub use error::ModuleSystemError;
pub use installer::ModuleInstaller;
pub use manager::{DefaultModuleManager, ModuleManager};
pub use manifest::ModuleManifest;
pub use module::{Module, ModuleStatus};
pub use repository::{InMemoryModuleRepository, JsonFileModuleRepository, ModuleRepository};
pub use updater::ModuleUpdater;
pub use version::ModuleVersion;

#[cfg(test)]
mod tests;
