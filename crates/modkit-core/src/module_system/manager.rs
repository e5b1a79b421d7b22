//! # Module Manager
//!
//! Lifecycle of persisted modules: syncing the store with the modules
//! directory, enable/disable under the dependency invariants, schema hook
//! delegation and removal.
//!
//! A module is only enabled when every requirement from both dependency
//! channels resolves to an enabled module with a matching version, and only
//! disabled when no enabled module depends on it. Failed checks leave the
//! persisted record untouched.
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{ModuleEvent, SharedEventDispatcher};
use crate::kernel::constants::DEFAULT_LOCK_LEASE_SECS;
use crate::kernel::error::{Error, Result};
use crate::module_system::dependency::{DependencyCheckResult, DependencyResolver, ModuleDependency};
use crate::module_system::discovery::ModuleDiscovery;
use crate::module_system::error::ModuleSystemError;
use crate::module_system::hooks::{EnabledModulesCache, NoopModulesCache, SchemaHook, SchemaHookError, SchemaOutcome};
use crate::module_system::lock::{module_lock_key, LockStore};
use crate::module_system::manifest::ModuleSource;
use crate::module_system::module::Module;
use crate::module_system::repository::ModuleRepository;

/// Version change applied to an existing record during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSync {
    pub name: String,
    pub from: String,
    pub to: String,
}

/// Manifest that could not become a module record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedManifest {
    pub name: String,
    pub reason: String,
}

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Newly registered modules
    pub discovered: Vec<String>,
    pub synced: Vec<VersionSync>,
    pub unchanged: Vec<String>,
    pub rejected: Vec<RejectedManifest>,
}

impl DiscoveryReport {
    pub fn total(&self) -> usize {
        self.discovered.len() + self.synced.len() + self.unchanged.len()
    }
}

/// Module lifecycle interface
#[async_trait]
pub trait ModuleManager: Send + Sync {
    /// Registers new modules found on disk and syncs changed versions
    async fn discover(&self) -> Result<DiscoveryReport>;

    async fn enable(&self, name: &str) -> Result<Module>;

    async fn disable(&self, name: &str) -> Result<Module>;

    /// Both dependency channels, merged, against the enabled modules
    async fn check_dependencies(&self, name: &str) -> Result<DependencyCheckResult>;

    async fn migrate(&self, name: &str) -> Result<SchemaOutcome>;

    async fn rollback(&self, name: &str, steps: usize) -> Result<SchemaOutcome>;

    async fn seed(&self, name: &str) -> Result<SchemaOutcome>;

    async fn get_module(&self, name: &str) -> Result<Option<Module>>;

    async fn modules(&self) -> Result<Vec<Module>>;

    async fn enabled_modules(&self) -> Result<Vec<Module>>;

    /// Names of modules depending on `name` through either channel
    async fn dependents_of(&self, name: &str) -> Result<Vec<String>>;

    /// Deletes a disabled module nobody depends on, files and record
    async fn uninstall(&self, name: &str) -> Result<()>;

    async fn set_update_source(&self, name: &str, source: Option<ModuleSource>) -> Result<Module>;
}

pub struct DefaultModuleManager {
    modules_path: PathBuf,
    discovery: ModuleDiscovery,
    repository: Arc<dyn ModuleRepository>,
    schema: Arc<dyn SchemaHook>,
    cache: Arc<dyn EnabledModulesCache>,
    events: SharedEventDispatcher,
    resolver: DependencyResolver,
    locks: Option<(Arc<dyn LockStore>, Duration)>,
}

impl fmt::Debug for DefaultModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultModuleManager")
            .field("modules_path", &self.modules_path)
            .field("locked", &self.locks.is_some())
            .finish_non_exhaustive()
    }
}

impl DefaultModuleManager {
    pub fn new(
        modules_path: impl Into<PathBuf>,
        repository: Arc<dyn ModuleRepository>,
        schema: Arc<dyn SchemaHook>,
        events: SharedEventDispatcher,
    ) -> Self {
        let modules_path = modules_path.into();
        Self {
            discovery: ModuleDiscovery::new(modules_path.clone()),
            modules_path,
            repository,
            schema,
            cache: Arc::new(NoopModulesCache),
            events,
            resolver: DependencyResolver::new(),
            locks: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn EnabledModulesCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Serializes enable/disable/uninstall of a module with its updates
    /// through the `module:{name}` lock.
    pub fn with_locks(mut self, locks: Arc<dyn LockStore>, lease: Option<Duration>) -> Self {
        let lease = lease.unwrap_or(Duration::from_secs(DEFAULT_LOCK_LEASE_SECS));
        self.locks = Some((locks, lease));
        self
    }

    pub fn modules_path(&self) -> &Path {
        &self.modules_path
    }

    pub fn repository(&self) -> &Arc<dyn ModuleRepository> {
        &self.repository
    }

    async fn find_module(&self, name: &str) -> Result<Module> {
        self.repository
            .find_by_name(name)
            .await?
            .ok_or_else(|| ModuleSystemError::not_found(name).into())
    }

    async fn locked<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some((store, lease)) = &self.locks else {
            return op().await;
        };
        let key = module_lock_key(name);
        let token = store.acquire(&key, *lease).await?;
        let result = op().await;
        if let Err(e) = store.release(&key, token).await {
            log::warn!("Failed to release lock '{}': {}", key, e);
        }
        result
    }

    /// Runs the migrate hook after a version change; failures are logged.
    async fn sync_schema(&self, module: &Module, from: &str) {
        let dir = module.directory(&self.modules_path);
        match self.schema.migrate(module.name(), &dir).await {
            SchemaOutcome::Applied(n) => log::info!(
                "Applied {} schema step(s) for module '{}' ({} -> {})",
                n,
                module.name(),
                from,
                module.version
            ),
            SchemaOutcome::Skipped(reason) => log::debug!("Schema sync skipped for module '{}': {}", module.name(), reason),
            SchemaOutcome::Failed(e) => log::warn!(
                "Schema sync failed for module '{}' ({} -> {}): {}",
                module.name(),
                from,
                module.version,
                e
            ),
        }
    }

    /// First unmet requirement of `module`, in declaration order
    fn first_violation(module: &Module, requirements: &[String], check: &DependencyCheckResult) -> Option<ModuleSystemError> {
        requirements
            .iter()
            .filter_map(|r| ModuleDependency::parse(r))
            .find_map(|dependency| {
                if check.missing.contains(&dependency.name) {
                    return Some(ModuleSystemError::MissingDependency {
                        module: module.name().to_string(),
                        dependency: dependency.name,
                    });
                }
                check
                    .version_mismatch
                    .get(&dependency.name)
                    .map(|mismatch| ModuleSystemError::DependencyVersionMismatch {
                        module: module.name().to_string(),
                        dependency: dependency.name.clone(),
                        required: mismatch.required.clone(),
                        current: mismatch.current.clone(),
                    })
            })
    }

    async fn enable_unlocked(&self, name: &str) -> Result<Module> {
        let mut module = self.find_module(name).await?;
        if module.is_enabled() {
            return Err(ModuleSystemError::AlreadyEnabled(name.to_string()).into());
        }

        let all = self.repository.find_all().await?;
        let requirements = module.all_requirements();
        let check = self.resolver.check_requirements(&requirements, &all, true);
        if !check.satisfied {
            let violation = Self::first_violation(&module, &requirements, &check).unwrap_or_else(|| {
                ModuleSystemError::MissingDependency {
                    module: name.to_string(),
                    dependency: check.missing.first().cloned().unwrap_or_default(),
                }
            });
            return Err(violation.into());
        }

        let dir = module.directory(&self.modules_path);
        match self.schema.migrate(name, &dir).await {
            SchemaOutcome::Applied(n) => log::info!("Applied {} schema step(s) for module '{}'", n, name),
            SchemaOutcome::Skipped(reason) => log::debug!("Schema changes skipped for module '{}': {}", name, reason),
            SchemaOutcome::Failed(SchemaHookError::MissingDirectory(path)) => {
                log::warn!("Module '{}' has no directory at {}; enabling without schema changes", name, path.display())
            }
            SchemaOutcome::Failed(source) => {
                return Err(ModuleSystemError::SchemaHook {
                    module: name.to_string(),
                    source,
                }
                .into())
            }
        }

        module.enable();
        self.repository.save(&module).await?;
        self.cache.invalidate().await;
        log::info!("Enabled module '{}' {}", name, module.version);
        self.events
            .dispatch(&ModuleEvent::Enabled { name: name.to_string() })
            .await;
        Ok(module)
    }

    async fn disable_unlocked(&self, name: &str) -> Result<Module> {
        let mut module = self.find_module(name).await?;
        if module.is_disabled() {
            return Err(ModuleSystemError::AlreadyDisabled(name.to_string()).into());
        }

        let all = self.repository.find_all().await?;
        let blocking: Vec<String> = self
            .resolver
            .get_dependents(name, &all)
            .into_iter()
            .filter(|m| m.is_enabled())
            .map(|m| m.name().to_string())
            .collect();
        if !blocking.is_empty() {
            return Err(ModuleSystemError::EnabledDependents {
                module: name.to_string(),
                dependents: blocking,
            }
            .into());
        }

        module.disable();
        self.repository.save(&module).await?;
        self.cache.invalidate().await;
        log::info!("Disabled module '{}'", name);
        self.events
            .dispatch(&ModuleEvent::Disabled { name: name.to_string() })
            .await;
        Ok(module)
    }

    async fn uninstall_unlocked(&self, name: &str) -> Result<()> {
        let module = self.find_module(name).await?;
        if module.is_enabled() {
            return Err(ModuleSystemError::StillEnabled(name.to_string()).into());
        }
        let dependents = self.dependents_of(name).await?;
        if !dependents.is_empty() {
            return Err(ModuleSystemError::HasDependents {
                module: name.to_string(),
                dependents,
            }
            .into());
        }

        let dir = module.directory(&self.modules_path);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Module '{}' had no directory at {}", name, dir.display())
            }
            Err(e) => return Err(Error::io(e, "remove_module_dir", &dir)),
        }
        self.repository.delete(&module.id).await?;
        self.cache.invalidate().await;
        log::info!("Removed module '{}'", name);
        self.events
            .dispatch(&ModuleEvent::Uninstalled { name: name.to_string() })
            .await;
        Ok(())
    }

    /// Turns a failed outcome of an explicitly requested schema operation
    /// into an error.
    fn explicit_outcome(name: &str, outcome: SchemaOutcome) -> Result<SchemaOutcome> {
        match outcome {
            SchemaOutcome::Failed(source) => Err(ModuleSystemError::SchemaHook {
                module: name.to_string(),
                source,
            }
            .into()),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl ModuleManager for DefaultModuleManager {
    async fn discover(&self) -> Result<DiscoveryReport> {
        let manifests = self.discovery.discover().await?;
        let mut report = DiscoveryReport::default();

        for manifest in manifests {
            match self.repository.find_by_name(&manifest.name).await? {
                Some(mut existing) => {
                    if existing.version == manifest.version {
                        report.unchanged.push(manifest.name);
                        continue;
                    }
                    let from = existing.version.clone();
                    existing.set_version(manifest.version.clone());
                    self.repository.save(&existing).await?;
                    log::info!("Module '{}' version changed on disk: {} -> {}", existing.name(), from, existing.version);
                    if existing.is_enabled() {
                        self.sync_schema(&existing, &from).await;
                    }
                    report.synced.push(VersionSync {
                        name: manifest.name,
                        from,
                        to: existing.version,
                    });
                }
                None => {
                    let module = match Module::from_manifest(&manifest) {
                        Ok(module) => module,
                        Err(e) => {
                            log::warn!("Skipping module manifest at {}: {}", manifest.path.display(), e);
                            report.rejected.push(RejectedManifest {
                                name: manifest.name,
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };
                    self.repository.save(&module).await?;
                    log::info!("Discovered module '{}' {}", module.name(), module.version);
                    self.events
                        .dispatch(&ModuleEvent::Discovered {
                            name: module.name().to_string(),
                            version: module.version.clone(),
                        })
                        .await;
                    report.discovered.push(manifest.name);
                }
            }
        }

        log::debug!(
            "Discovery in {}: {} new, {} synced, {} unchanged, {} rejected",
            self.modules_path.display(),
            report.discovered.len(),
            report.synced.len(),
            report.unchanged.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    async fn enable(&self, name: &str) -> Result<Module> {
        self.locked(name, || self.enable_unlocked(name)).await
    }

    async fn disable(&self, name: &str) -> Result<Module> {
        self.locked(name, || self.disable_unlocked(name)).await
    }

    async fn check_dependencies(&self, name: &str) -> Result<DependencyCheckResult> {
        let module = self.find_module(name).await?;
        let requirements = module.all_requirements();
        if requirements.is_empty() {
            return Ok(DependencyCheckResult::satisfied());
        }
        let all = self.repository.find_all().await?;
        Ok(self.resolver.check_requirements(&requirements, &all, true))
    }

    async fn migrate(&self, name: &str) -> Result<SchemaOutcome> {
        let module = self.find_module(name).await?;
        let outcome = self.schema.migrate(name, &module.directory(&self.modules_path)).await;
        Self::explicit_outcome(name, outcome)
    }

    async fn rollback(&self, name: &str, steps: usize) -> Result<SchemaOutcome> {
        let module = self.find_module(name).await?;
        let outcome = self
            .schema
            .rollback(name, &module.directory(&self.modules_path), steps)
            .await;
        Self::explicit_outcome(name, outcome)
    }

    async fn seed(&self, name: &str) -> Result<SchemaOutcome> {
        let module = self.find_module(name).await?;
        let outcome = self.schema.seed(name, &module.directory(&self.modules_path)).await;
        Self::explicit_outcome(name, outcome)
    }

    async fn get_module(&self, name: &str) -> Result<Option<Module>> {
        self.repository.find_by_name(name).await
    }

    async fn modules(&self) -> Result<Vec<Module>> {
        self.repository.find_all().await
    }

    async fn enabled_modules(&self) -> Result<Vec<Module>> {
        self.repository.find_enabled().await
    }

    async fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let all = self.repository.find_all().await?;
        Ok(self
            .resolver
            .get_dependents(name, &all)
            .into_iter()
            .map(|m| m.name().to_string())
            .collect())
    }

    async fn uninstall(&self, name: &str) -> Result<()> {
        self.locked(name, || self.uninstall_unlocked(name)).await
    }

    async fn set_update_source(&self, name: &str, source: Option<ModuleSource>) -> Result<Module> {
        let mut module = self.find_module(name).await?;
        module.set_source(source);
        self.repository.save(&module).await?;
        match &module.source {
            Some(source) => log::info!("Module '{}' now updates from {}", name, source.slug()),
            None => log::info!("Module '{}' no longer has an update source", name),
        }
        Ok(module)
    }
}
