//! # Module Updater
//!
//! Updates a module from its remote release source as a reversible
//! sequence of steps:
//!
//! `Idle -> Locked -> Downloading -> Verifying -> BackingUp -> Swapping ->
//! HealthChecking -> {Completed | RolledBack | Failed}`
//!
//! The whole sequence runs under the `module:{name}` advisory lock. A
//! checksum mismatch aborts before the installed files are touched; a
//! failed health check restores the pre-update backup when auto-rollback
//! is enabled.
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{ModuleEvent, SharedEventDispatcher};
use crate::kernel::constants::DEFAULT_LOCK_LEASE_SECS;
use crate::kernel::error::{Error, Result};
use crate::module_system::archive;
use crate::module_system::backup::{BackupInfo, BackupStore};
use crate::module_system::dependency::{DependencyResolver, SystemEnvironment};
use crate::module_system::discovery::ModuleDiscovery;
use crate::module_system::error::ModuleSystemError;
use crate::module_system::health::{HealthCheckResult, HealthChecker};
use crate::module_system::hooks::{SchemaHook, SchemaOutcome};
use crate::module_system::lock::{module_lock_key, LockError, LockStore};
use crate::module_system::manifest::{ModuleManifest, ModuleSource};
use crate::module_system::module::Module;
use crate::module_system::release::{ChecksumVerification, ReleaseInfo, ReleaseSource};
use crate::module_system::repository::ModuleRepository;
use crate::module_system::version::ModuleVersion;
use crate::utils::fs::replace_dir;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Module '{0}' has no update source configured")]
    NoSource(String),

    #[error("No update available for module '{module}' (installed version {current})")]
    NoUpdateAvailable { module: String, current: String },

    #[error("Checksum verification failed for module '{module}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        module: String,
        expected: String,
        actual: String,
    },

    #[error("Could not acquire the update lock for module '{0}': another update is in progress")]
    LockHeld(String),

    #[error("Module directory not found: {0}")]
    ModuleDirectoryMissing(PathBuf),

    #[error("Release of module '{module}' is not installable: {message}")]
    InvalidRelease { module: String, message: String },

    #[error("Health check failed for module '{module}'{}: {}", rollback_note(.rolled_back), .errors.join("; "))]
    HealthCheckFailed {
        module: String,
        errors: Vec<String>,
        rolled_back: bool,
    },
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        " (rolled back)"
    } else {
        ""
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    Idle,
    Locked,
    Downloading,
    Verifying,
    BackingUp,
    Swapping,
    HealthChecking,
    Completed,
    RolledBack,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateState::Idle => "idle",
            UpdateState::Locked => "locked",
            UpdateState::Downloading => "downloading",
            UpdateState::Verifying => "verifying",
            UpdateState::BackingUp => "backing_up",
            UpdateState::Swapping => "swapping",
            UpdateState::HealthChecking => "health_checking",
            UpdateState::Completed => "completed",
            UpdateState::RolledBack => "rolled_back",
            UpdateState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Read-only summary of an available update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePreview {
    pub module: String,
    pub current_version: String,
    pub latest_version: String,
    pub tag_name: String,
    pub release_name: Option<String>,
    pub release_notes: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
    pub is_major_update: bool,
    pub compatible: bool,
    pub compatibility_issues: Vec<String>,
    pub has_checksum: bool,
}

/// Result of a completed update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub module: String,
    pub from_version: String,
    pub to_version: String,
    pub state: UpdateState,
    pub transitions: Vec<UpdateState>,
    pub backup: Option<BackupInfo>,
    pub checksum_verified: bool,
    pub health: Option<HealthCheckResult>,
}

/// Outcome of a batch update check for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub module: String,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSettings {
    pub include_prerelease: bool,
    pub health_check: bool,
    pub auto_rollback: bool,
    pub lock_lease: Duration,
    /// Where downloads are staged; system temp dir when unset
    pub temp_root: Option<PathBuf>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            include_prerelease: false,
            health_check: true,
            auto_rollback: true,
            lock_lease: Duration::from_secs(DEFAULT_LOCK_LEASE_SECS),
            temp_root: None,
        }
    }
}

// Records state transitions of one update run.
struct UpdateRun {
    module: String,
    transitions: Vec<UpdateState>,
}

impl UpdateRun {
    fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            transitions: vec![UpdateState::Idle],
        }
    }

    fn enter(&mut self, state: UpdateState) {
        log::debug!("Update of '{}': {}", self.module, state);
        self.transitions.push(state);
    }

    fn state(&self) -> UpdateState {
        self.transitions.last().copied().unwrap_or(UpdateState::Idle)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("Blocking update task failed: {}", e)))?
}

pub struct ModuleUpdater {
    modules_path: PathBuf,
    repository: Arc<dyn ModuleRepository>,
    releases: Arc<dyn ReleaseSource>,
    backups: BackupStore,
    locks: Arc<dyn LockStore>,
    health: HealthChecker,
    schema: Arc<dyn SchemaHook>,
    events: SharedEventDispatcher,
    resolver: DependencyResolver,
    environment: SystemEnvironment,
    settings: UpdateSettings,
}

impl fmt::Debug for ModuleUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleUpdater")
            .field("modules_path", &self.modules_path)
            .field("backups", &self.backups)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModuleUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        modules_path: impl Into<PathBuf>,
        repository: Arc<dyn ModuleRepository>,
        releases: Arc<dyn ReleaseSource>,
        backups: BackupStore,
        locks: Arc<dyn LockStore>,
        health: HealthChecker,
        schema: Arc<dyn SchemaHook>,
        events: SharedEventDispatcher,
    ) -> Self {
        Self {
            modules_path: modules_path.into(),
            repository,
            releases,
            backups,
            locks,
            health,
            schema,
            events,
            resolver: DependencyResolver::new(),
            environment: SystemEnvironment::default(),
            settings: UpdateSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: UpdateSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_environment(mut self, environment: SystemEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn module_dir(&self, module: &Module) -> PathBuf {
        module.directory(&self.modules_path)
    }

    async fn find_module(&self, name: &str) -> Result<Module> {
        self.repository
            .find_by_name(name)
            .await?
            .ok_or_else(|| ModuleSystemError::not_found(name).into())
    }

    fn require_source(module: &Module) -> Result<ModuleSource> {
        module
            .source
            .clone()
            .ok_or_else(|| UpdateError::NoSource(module.name().to_string()).into())
    }

    /// Fetches the newest release and checks that it is newer than the
    /// installed version.
    async fn newer_release(&self, module: &Module, source: &ModuleSource, include_prerelease: bool) -> Result<(ReleaseInfo, ModuleVersion, ModuleVersion)> {
        let no_update = || UpdateError::NoUpdateAvailable {
            module: module.name().to_string(),
            current: module.version.clone(),
        };
        let release = self
            .releases
            .latest_release(source, include_prerelease)
            .await?
            .ok_or_else(no_update)?;
        if release.prerelease && !include_prerelease {
            return Err(no_update().into());
        }

        let current = ModuleVersion::parse(&module.version)?;
        let latest = ModuleVersion::parse(&release.version)?;
        if current >= latest {
            return Err(no_update().into());
        }
        Ok((release, current, latest))
    }

    /// Describes the available update without changing anything.
    pub async fn preview(&self, name: &str, include_prerelease: Option<bool>) -> Result<UpdatePreview> {
        let module = self.find_module(name).await?;
        let source = Self::require_source(&module)?;
        let include = include_prerelease.unwrap_or(self.settings.include_prerelease);
        let (release, current, latest) = self.newer_release(&module, &source, include).await?;

        let issues = self.resolver.system_requirement_failures(&module, &self.environment);
        Ok(UpdatePreview {
            module: module.name().to_string(),
            current_version: module.version.clone(),
            latest_version: release.version.clone(),
            tag_name: release.tag_name.clone(),
            release_name: release.name.clone(),
            release_notes: release.body.clone(),
            published_at: release.published_at,
            prerelease: release.prerelease,
            is_major_update: current.is_major_bump_to(&latest),
            compatible: issues.is_empty(),
            compatibility_issues: issues,
            has_checksum: release.checksum_url.is_some(),
        })
    }

    /// Updates `name` to its newest release.
    ///
    /// `include_prerelease` overrides the configured prerelease policy; when
    /// set, cached release data is dropped first so the choice is re-checked.
    pub async fn update(&self, name: &str, include_prerelease: Option<bool>) -> Result<UpdateReport> {
        let key = module_lock_key(name);
        let token = self
            .locks
            .acquire(&key, self.settings.lock_lease)
            .await
            .map_err(|e| match e {
                LockError::Held(_) => Error::from(UpdateError::LockHeld(name.to_string())),
                other => Error::from(other),
            })?;

        let mut run = UpdateRun::new(name);
        run.enter(UpdateState::Locked);
        let outcome = self.run_update(name, include_prerelease, &mut run).await;

        match self.locks.release(&key, token).await {
            Ok(true) => {}
            Ok(false) => log::warn!("Update lock for '{}' was released by someone else", name),
            Err(e) => log::error!("Failed to release update lock for '{}': {}", name, e),
        }

        if let Err(e) = &outcome {
            if run.state() != UpdateState::RolledBack {
                run.enter(UpdateState::Failed);
            }
            log::error!("Update of module '{}' failed after {:?}: {}", name, run.transitions, e);
            self.events
                .dispatch(&ModuleEvent::UpdateFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                })
                .await;
        }
        outcome
    }

    async fn run_update(&self, name: &str, include_prerelease: Option<bool>, run: &mut UpdateRun) -> Result<UpdateReport> {
        let mut module = self.find_module(name).await?;
        let source = Self::require_source(&module)?;
        let include = include_prerelease.unwrap_or(self.settings.include_prerelease);
        if include_prerelease.is_some() {
            self.releases.invalidate(&source).await;
        }
        let (release, _, _) = self.newer_release(&module, &source, include).await?;

        let module_dir = self.module_dir(&module);
        if !tokio::fs::try_exists(&module_dir).await.unwrap_or(false) {
            return Err(UpdateError::ModuleDirectoryMissing(module_dir).into());
        }

        let from_version = module.version.clone();
        log::info!("Updating module '{}' from {} to {}", name, from_version, release.version);
        self.events
            .dispatch(&ModuleEvent::UpdateStarted {
                name: name.to_string(),
                from_version: from_version.clone(),
                to_version: release.version.clone(),
            })
            .await;

        let staging = self.staging_dir()?;
        let archive_path = staging.path().join("release.zip");

        run.enter(UpdateState::Downloading);
        self.releases.download(&release, &archive_path).await?;

        run.enter(UpdateState::Verifying);
        let checksum_verified = match self.releases.verify_checksum(&release, &archive_path).await? {
            ChecksumVerification::Verified => true,
            ChecksumVerification::Skipped => false,
            ChecksumVerification::Mismatch { expected, actual } => {
                return Err(UpdateError::ChecksumMismatch {
                    module: name.to_string(),
                    expected,
                    actual,
                }
                .into())
            }
        };
        let (release_root, manifest) = self.unpack_release(name, &archive_path, staging.path()).await?;

        run.enter(UpdateState::BackingUp);
        let backup = self.backups.create_backup(name, &from_version, &module_dir).await?;

        run.enter(UpdateState::Swapping);
        let (src, dest) = (release_root.clone(), module_dir.clone());
        blocking(move || replace_dir(&src, &dest).map_err(|e| Error::io(e, "swap_module_dir", &dest))).await?;

        let mut health = None;
        if self.settings.health_check {
            run.enter(UpdateState::HealthChecking);
            let result = self.run_health_check(name, &manifest.provider, &module_dir).await?;
            if !result.passes() {
                return Err(self.handle_failed_health_check(name, result, &backup, &module_dir, run).await);
            }
            health = Some(result);
        }

        module.set_version(release.version.clone());
        module.namespace = manifest.namespace.clone();
        module.provider = manifest.provider.clone();
        module.requirements = manifest.requires.clone();
        module.dependencies = manifest.dependencies.clone();
        if let Err(e) = self.repository.save(&module).await {
            log::error!("Persisting update of '{}' failed, restoring backup: {}", name, e);
            if let Err(restore_err) = self.backups.restore_backup(&backup.path, &module_dir).await {
                log::error!("Restoring backup of '{}' failed: {}", name, restore_err);
            }
            return Err(e);
        }

        if module.is_enabled() {
            match self.schema.migrate(name, &module_dir).await {
                SchemaOutcome::Failed(e) => {
                    log::warn!("Migrations for '{}' after update to {} failed: {}", name, release.version, e)
                }
                SchemaOutcome::Applied(n) => log::debug!("Applied {} migration step(s) for '{}'", n, name),
                SchemaOutcome::Skipped(reason) => log::debug!("Migrations for '{}' skipped: {}", name, reason),
            }
        }

        run.enter(UpdateState::Completed);
        log::info!("Module '{}' updated to {}", name, release.version);
        self.events
            .dispatch(&ModuleEvent::UpdateCompleted {
                name: name.to_string(),
                from_version: from_version.clone(),
                to_version: release.version.clone(),
            })
            .await;

        Ok(UpdateReport {
            module: name.to_string(),
            from_version,
            to_version: release.version,
            state: run.state(),
            transitions: run.transitions.clone(),
            backup: Some(backup),
            checksum_verified,
            health,
        })
    }

    fn staging_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("modkit-update-");
        match &self.settings.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| Error::io(e, "create_temp_root", root))?;
                builder.tempdir_in(root).map_err(|e| Error::io(e, "create_staging_dir", root))
            }
            None => builder
                .tempdir()
                .map_err(|e| Error::io(e, "create_staging_dir", std::env::temp_dir())),
        }
    }

    /// Extracts the downloaded archive and reads the release manifest.
    async fn unpack_release(&self, name: &str, archive_path: &Path, staging: &Path) -> Result<(PathBuf, ModuleManifest)> {
        let invalid = |message: String| UpdateError::InvalidRelease {
            module: name.to_string(),
            message,
        };

        let (archive_path, extract_dir) = (archive_path.to_path_buf(), staging.join("extracted"));
        let extracted = extract_dir.clone();
        let unpacked = blocking(move || {
            let mut zip = archive::open_zip(&archive_path).map_err(|e| Error::Other(e.to_string()))?;
            archive::extract_zip(&mut zip, &extracted).map_err(|e| Error::Other(e.to_string()))?;
            archive::locate_module_root(&extracted).map_err(|e| Error::io(e, "locate_release_root", &extracted))
        })
        .await;

        let root = match unpacked {
            Ok(Some(root)) => root,
            Ok(None) => return Err(invalid("module.json not found in release archive".to_string()).into()),
            Err(Error::Other(message)) => return Err(invalid(message).into()),
            Err(e) => return Err(e),
        };

        let manifest = ModuleDiscovery::load_manifest(&root)
            .await?
            .ok_or_else(|| invalid("module.json not found in release archive".to_string()))?;
        if manifest.name != name {
            return Err(invalid(format!("archive contains module '{}'", manifest.name)).into());
        }
        Ok((root, manifest))
    }

    async fn run_health_check(&self, name: &str, provider: &str, module_dir: &Path) -> Result<HealthCheckResult> {
        let checker = self.health.clone();
        let (name, provider, dir) = (name.to_string(), provider.to_string(), module_dir.to_path_buf());
        blocking(move || Ok(checker.check(&name, &provider, &dir))).await
    }

    async fn handle_failed_health_check(
        &self,
        name: &str,
        result: HealthCheckResult,
        backup: &BackupInfo,
        module_dir: &Path,
        run: &mut UpdateRun,
    ) -> Error {
        let errors = result.into_failures();
        if !self.settings.auto_rollback {
            log::warn!("Health check of '{}' failed, auto-rollback disabled; leaving new files in place", name);
            return UpdateError::HealthCheckFailed {
                module: name.to_string(),
                errors,
                rolled_back: false,
            }
            .into();
        }

        if let Err(e) = self.backups.restore_backup(&backup.path, module_dir).await {
            log::error!("Auto-rollback of '{}' failed: {}", name, e);
            return e.into();
        }
        run.enter(UpdateState::RolledBack);
        log::warn!("Health check of '{}' failed, restored backup {}", name, backup.path.display());
        self.events
            .dispatch(&ModuleEvent::UpdateRolledBack {
                name: name.to_string(),
                errors: errors.clone(),
            })
            .await;
        UpdateError::HealthCheckFailed {
            module: name.to_string(),
            errors,
            rolled_back: true,
        }
        .into()
    }

    /// Restores `backup` over the module directory and re-syncs the persisted
    /// version from the restored manifest.
    pub async fn rollback(&self, name: &str, backup: &Path) -> Result<Module> {
        let mut module = self.find_module(name).await?;
        let key = module_lock_key(name);
        let token = self
            .locks
            .acquire(&key, self.settings.lock_lease)
            .await
            .map_err(|e| match e {
                LockError::Held(_) => Error::from(UpdateError::LockHeld(name.to_string())),
                other => Error::from(other),
            })?;

        let module_dir = self.module_dir(&module);
        let outcome = async {
            self.backups.restore_backup(backup, &module_dir).await?;
            if let Some(manifest) = ModuleDiscovery::load_manifest(&module_dir).await? {
                if manifest.version != module.version {
                    module.set_version(manifest.version);
                    self.repository.save(&module).await?;
                }
            }
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = self.locks.release(&key, token).await {
            log::error!("Failed to release lock for '{}': {}", name, e);
        }
        outcome?;
        log::info!("Module '{}' rolled back to {} from {}", name, module.version, backup.display());
        Ok(module)
    }

    pub async fn is_update_in_progress(&self, name: &str) -> Result<bool> {
        Ok(self.locks.is_locked(&module_lock_key(name)).await?)
    }

    /// Force-releases the update lock; returns whether one was held.
    pub async fn cancel_update(&self, name: &str) -> Result<bool> {
        let released = self.locks.force_release(&module_lock_key(name)).await?;
        if released {
            log::warn!("Update lock for module '{}' force-released", name);
        }
        Ok(released)
    }

    /// Checks every module with an update source in one pass. `force`
    /// bypasses cached release data. Each checked module gets its
    /// `last_update_check_at` stamped.
    pub async fn check_for_updates(&self, force: bool) -> Result<Vec<UpdateCheck>> {
        let modules: Vec<Module> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .filter(Module::has_update_source)
            .collect();
        let sources: Vec<ModuleSource> = modules.iter().filter_map(|m| m.source.clone()).collect();

        if force {
            for source in &sources {
                self.releases.invalidate(source).await;
            }
        }
        let releases: Vec<(ModuleSource, std::result::Result<Option<ReleaseInfo>, String>)> = self
            .releases
            .latest_releases(&sources, self.settings.include_prerelease)
            .await
            .into_iter()
            .map(|(source, result)| (source, result.map_err(|e| e.to_string())))
            .collect();

        let mut checks = Vec::with_capacity(modules.len());
        for mut module in modules {
            let lookup = releases
                .iter()
                .find(|(source, _)| Some(source) == module.source.as_ref())
                .map(|(_, result)| result.clone());

            let mut check = UpdateCheck {
                module: module.name().to_string(),
                current_version: module.version.clone(),
                latest_version: None,
                update_available: false,
                error: None,
            };
            match lookup {
                Some(Ok(Some(release))) => {
                    check.update_available = match (ModuleVersion::parse(&module.version), release.parsed_version()) {
                        (Ok(current), Some(latest)) => latest > current,
                        _ => false,
                    };
                    check.latest_version = Some(release.version);
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => check.error = Some(e),
                None => check.error = Some("no release lookup result".to_string()),
            }

            module.mark_update_checked();
            if let Err(e) = self.repository.save(&module).await {
                log::warn!("Failed to record update check for '{}': {}", module.name(), e);
            }
            checks.push(check);
        }
        Ok(checks)
    }

    pub async fn list_backups(&self, name: &str) -> Result<Vec<BackupInfo>> {
        Ok(self.backups.list_backups(name).await?)
    }

    pub async fn backup_size(&self, name: &str) -> Result<u64> {
        Ok(self.backups.backup_size(name).await?)
    }

    pub async fn delete_backup(&self, path: &Path) -> Result<()> {
        Ok(self.backups.delete_backup(path).await?)
    }
}
