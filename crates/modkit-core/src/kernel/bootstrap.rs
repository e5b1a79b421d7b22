use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::event::{create_dispatcher, SharedEventDispatcher};
use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::module_system::backup::BackupStore;
use crate::module_system::capabilities::{apply_contributor, CapabilityRegistry, ModuleContributor};
use crate::module_system::dependency::DependencyResolver;
use crate::module_system::health::HealthChecker;
use crate::module_system::hooks::{CommandSchemaHook, EnabledModulesCache, NoopModulesCache, NoopSchemaHook, SchemaHook};
use crate::module_system::installer::{InstalledModule, ModuleInstaller};
use crate::module_system::lock::{FileLockStore, LockStore};
use crate::module_system::manager::{DefaultModuleManager, DiscoveryReport, ModuleManager};
use crate::module_system::module::Module;
use crate::module_system::release::{GitHubReleaseClient, ReleaseSource};
use crate::module_system::repository::{JsonFileModuleRepository, ModuleRepository};
use crate::module_system::scaffold::ModuleScaffolder;
use crate::module_system::updater::{ModuleUpdater, UpdateSettings};
use crate::storage::config::ModuleSystemConfig;

/// Result of [`Application::boot`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootReport {
    pub discovery: DiscoveryReport,
    /// Enabled modules whose contributors ran, in dependency order
    pub activated: Vec<String>,
    /// Modules whose contributions were rejected, with the reason
    pub failed: Vec<(String, String)>,
}

/// Collaborators replacing the defaults derived from configuration
#[derive(Default)]
pub struct ApplicationBuilder {
    config: ModuleSystemConfig,
    events: Option<SharedEventDispatcher>,
    repository: Option<Arc<dyn ModuleRepository>>,
    releases: Option<Arc<dyn ReleaseSource>>,
    schema: Option<Arc<dyn SchemaHook>>,
    locks: Option<Arc<dyn LockStore>>,
    health: Option<HealthChecker>,
    cache: Option<Arc<dyn EnabledModulesCache>>,
}

impl ApplicationBuilder {
    pub fn new(config: ModuleSystemConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn events(mut self, events: SharedEventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn ModuleRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn release_source(mut self, releases: Arc<dyn ReleaseSource>) -> Self {
        self.releases = Some(releases);
        self
    }

    pub fn schema_hook(mut self, schema: Arc<dyn SchemaHook>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn lock_store(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn health_checker(mut self, health: HealthChecker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn modules_cache(mut self, cache: Arc<dyn EnabledModulesCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config = self.config;
        let events = self.events.unwrap_or_else(create_dispatcher);

        let repository: Arc<dyn ModuleRepository> = match self.repository {
            Some(repository) => repository,
            None => Arc::new(JsonFileModuleRepository::new(config.repository_path.clone())),
        };
        let releases: Arc<dyn ReleaseSource> = match self.releases {
            Some(releases) => releases,
            None => Arc::new(GitHubReleaseClient::new(
                &config.updates.api_base,
                config.updates.token.as_deref(),
                config.updates.http_timeout(),
                config.updates.cache_ttl(),
            )?),
        };
        let schema: Arc<dyn SchemaHook> = match self.schema {
            Some(schema) => schema,
            None if config.schema.is_configured() => Arc::new(CommandSchemaHook::new(
                config.schema.migrate_command.clone(),
                config.schema.rollback_command.clone(),
                config.schema.seed_command.clone(),
            )),
            None => Arc::new(NoopSchemaHook),
        };
        let locks: Arc<dyn LockStore> = match self.locks {
            Some(locks) => locks,
            None => Arc::new(FileLockStore::new(config.locks_path.clone())),
        };
        let health = self
            .health
            .unwrap_or_else(|| HealthChecker::with_layout(config.health.layout()));
        let cache: Arc<dyn EnabledModulesCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(NoopModulesCache),
        };

        let manager = DefaultModuleManager::new(
            config.modules_path.clone(),
            repository.clone(),
            schema.clone(),
            events.clone(),
        )
        .with_cache(cache)
        .with_locks(locks.clone(), Some(config.updates.lock_lease()));

        let mut installer = ModuleInstaller::new(config.modules_path.clone(), events.clone())
            .with_max_upload_size(config.installer.max_upload_size)
            .with_forbidden_names(config.installer.forbidden_names.clone());
        if let Some(temp) = &config.temp_path {
            installer = installer.with_temp_root(temp.clone());
        }

        let updater = ModuleUpdater::new(
            config.modules_path.clone(),
            repository.clone(),
            releases,
            BackupStore::new(config.backups_path.clone(), config.updates.backup_retention),
            locks,
            health.clone(),
            schema,
            events.clone(),
        )
        .with_settings(UpdateSettings {
            include_prerelease: config.updates.include_prerelease,
            health_check: config.updates.health_check,
            auto_rollback: config.updates.auto_rollback,
            lock_lease: config.updates.lock_lease(),
            temp_root: config.temp_path.clone(),
        })
        .with_environment(config.environment.clone());

        let scaffolder = ModuleScaffolder::new(config.modules_path.clone())
            .with_forbidden_names(config.installer.forbidden_names.clone());

        Ok(Application {
            config,
            events,
            repository,
            manager,
            installer,
            updater,
            scaffolder,
            health,
            capabilities: Arc::new(RwLock::new(CapabilityRegistry::new())),
            contributors: HashMap::new(),
            booted: false,
        })
    }
}

/// The module host: owns the configured collaborators and the capability
/// registry that enabled modules contribute to.
pub struct Application {
    config: ModuleSystemConfig,
    events: SharedEventDispatcher,
    repository: Arc<dyn ModuleRepository>,
    manager: DefaultModuleManager,
    installer: ModuleInstaller,
    updater: ModuleUpdater,
    scaffolder: ModuleScaffolder,
    health: HealthChecker,
    capabilities: Arc<RwLock<CapabilityRegistry>>,
    contributors: HashMap<String, Arc<dyn ModuleContributor>>,
    booted: bool,
}

impl Application {
    /// Builds an application with the default collaborators for `config`.
    pub fn new(config: ModuleSystemConfig) -> Result<Self> {
        log::debug!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        ApplicationBuilder::new(config).build()
    }

    /// Loads configuration from `config_file`, resolving relative paths
    /// against `base_dir`.
    pub fn from_config_file(config_file: &Path, base_dir: &Path) -> Result<Self> {
        let config = ModuleSystemConfig::load(config_file)?
            .with_env_overrides()
            .resolve_paths(base_dir);
        Self::new(config)
    }

    pub fn builder(config: ModuleSystemConfig) -> ApplicationBuilder {
        ApplicationBuilder::new(config)
    }

    pub fn config(&self) -> &ModuleSystemConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventDispatcher {
        &self.events
    }

    pub fn repository(&self) -> &Arc<dyn ModuleRepository> {
        &self.repository
    }

    pub fn manager(&self) -> &DefaultModuleManager {
        &self.manager
    }

    pub fn installer(&self) -> &ModuleInstaller {
        &self.installer
    }

    pub fn updater(&self) -> &ModuleUpdater {
        &self.updater
    }

    pub fn scaffolder(&self) -> &ModuleScaffolder {
        &self.scaffolder
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.health
    }

    pub fn capabilities(&self) -> Arc<RwLock<CapabilityRegistry>> {
        self.capabilities.clone()
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    /// Registers the contributor of one module, replacing any previous one.
    pub fn register_contributor(&mut self, contributor: Arc<dyn ModuleContributor>) {
        self.contributors
            .insert(contributor.module().to_string(), contributor);
    }

    async fn contribute(&self, module: &str) -> Result<bool> {
        let Some(contributor) = self.contributors.get(module) else {
            return Ok(false);
        };
        let mut registry = self.capabilities.write().await;
        apply_contributor(contributor.as_ref(), &mut registry)?;
        Ok(true)
    }

    /// Discovers modules and lets the contributors of enabled modules
    /// populate a fresh capability registry, dependencies first.
    pub async fn boot(&mut self) -> Result<BootReport> {
        let modules_path = &self.config.modules_path;
        tokio::fs::create_dir_all(modules_path)
            .await
            .map_err(|e| Error::io(e, "create_modules_dir", modules_path))?;

        let discovery = self.manager.discover().await?;
        let enabled = self.manager.enabled_modules().await?;
        let ordered = DependencyResolver::new().sort_by_dependencies(&enabled)?;

        self.capabilities.write().await.clear();
        let mut report = BootReport {
            discovery,
            ..BootReport::default()
        };
        for module in &ordered {
            match self.contribute(module.name()).await {
                Ok(true) => report.activated.push(module.name().to_string()),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Module '{}' failed to register its capabilities: {}", module.name(), e);
                    report.failed.push((module.name().to_string(), e.to_string()));
                }
            }
        }

        self.booted = true;
        log::info!(
            "{} booted: {} module(s) known, {} enabled",
            constants::APP_NAME,
            report.discovery.total(),
            ordered.len()
        );
        Ok(report)
    }

    /// Enables the module and, once booted, registers its capabilities.
    pub async fn enable_module(&self, name: &str) -> Result<Module> {
        let module = self.manager.enable(name).await?;
        if self.booted {
            if let Err(e) = self.contribute(name).await {
                log::error!("Module '{}' enabled but its capabilities were rejected: {}", name, e);
            }
        }
        Ok(module)
    }

    /// Disables the module and withdraws its capabilities.
    pub async fn disable_module(&self, name: &str) -> Result<Module> {
        let module = self.manager.disable(name).await?;
        self.capabilities.write().await.unregister_module(name);
        Ok(module)
    }

    /// Installs an archive and registers the new module.
    pub async fn install(&self, archive: &Path) -> Result<InstalledModule> {
        let installed = self.installer.install_from_zip(archive).await?;
        self.manager.discover().await?;
        Ok(installed)
    }

    pub async fn uninstall(&self, name: &str) -> Result<()> {
        self.manager.uninstall(name).await?;
        self.capabilities.write().await.unregister_module(name);
        Ok(())
    }

    /// Clears the capability registry.
    pub async fn shutdown(&mut self) {
        self.capabilities.write().await.clear();
        self.booted = false;
        log::debug!("{} shut down", constants::APP_NAME);
    }
}
