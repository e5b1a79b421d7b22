use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
#[cfg(feature = "yaml-config")]
use serde_yaml;
#[cfg(feature = "toml-config")]
use toml;

use crate::kernel::constants::{
    DEFAULT_BACKUPS_DIR, DEFAULT_BACKUP_RETENTION, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOCKS_DIR,
    DEFAULT_LOCK_LEASE_SECS, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_MODULES_DIR, DEFAULT_RELEASE_API_BASE,
    DEFAULT_RELEASE_CACHE_TTL_SECS, DEFAULT_REPOSITORY_FILE, RELEASE_TOKEN_ENV, RESERVED_MODULE_NAMES,
};
use crate::kernel::error::Result;
use crate::module_system::dependency::SystemEnvironment;
use crate::module_system::health::HealthCheckLayout;
use crate::storage::error::StorageSystemError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub max_upload_size: u64,
    /// Compared case-insensitively
    pub forbidden_names: Vec<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            forbidden_names: RESERVED_MODULE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    pub include_prerelease: bool,
    pub health_check: bool,
    pub auto_rollback: bool,
    pub backup_retention: usize,
    pub lock_lease_secs: u64,
    pub cache_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub api_base: String,
    pub token: Option<String>,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            include_prerelease: false,
            health_check: true,
            auto_rollback: true,
            backup_retention: DEFAULT_BACKUP_RETENTION,
            lock_lease_secs: DEFAULT_LOCK_LEASE_SECS,
            cache_ttl_secs: DEFAULT_RELEASE_CACHE_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            api_base: DEFAULT_RELEASE_API_BASE.to_string(),
            token: None,
        }
    }
}

impl UpdatesConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub provider_dirs: Vec<String>,
    pub route_dirs: Vec<String>,
    pub resource_dirs: Vec<String>,
    pub provider_base: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let layout = HealthCheckLayout::default();
        Self {
            provider_dirs: layout.provider_dirs,
            route_dirs: layout.route_dirs,
            resource_dirs: layout.resource_dirs,
            provider_base: layout.provider_base,
        }
    }
}

impl HealthConfig {
    pub fn layout(&self) -> HealthCheckLayout {
        HealthCheckLayout {
            provider_dirs: self.provider_dirs.clone(),
            route_dirs: self.route_dirs.clone(),
            resource_dirs: self.resource_dirs.clone(),
            provider_base: self.provider_base.clone(),
        }
    }
}

/// Argv templates for the schema hook; `{module}`, `{path}` and `{steps}`
/// are substituted per argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub migrate_command: Option<Vec<String>>,
    pub rollback_command: Option<Vec<String>>,
    pub seed_command: Option<Vec<String>>,
}

impl SchemaConfig {
    pub fn is_configured(&self) -> bool {
        self.migrate_command.is_some() || self.rollback_command.is_some() || self.seed_command.is_some()
    }
}

/// Configuration of the module host. Every field has a default, so an
/// empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSystemConfig {
    pub modules_path: PathBuf,
    pub backups_path: PathBuf,
    pub repository_path: PathBuf,
    pub locks_path: PathBuf,
    pub temp_path: Option<PathBuf>,
    pub installer: InstallerConfig,
    pub updates: UpdatesConfig,
    pub health: HealthConfig,
    pub environment: SystemEnvironment,
    pub schema: SchemaConfig,
}

impl Default for ModuleSystemConfig {
    fn default() -> Self {
        Self {
            modules_path: PathBuf::from(DEFAULT_MODULES_DIR),
            backups_path: PathBuf::from(DEFAULT_BACKUPS_DIR),
            repository_path: PathBuf::from(DEFAULT_REPOSITORY_FILE),
            locks_path: PathBuf::from(DEFAULT_LOCKS_DIR),
            temp_path: None,
            installer: InstallerConfig::default(),
            updates: UpdatesConfig::default(),
            health: HealthConfig::default(),
            environment: SystemEnvironment::default(),
            schema: SchemaConfig::default(),
        }
    }
}

fn deserialization_error(format: ConfigFormat, source: impl std::error::Error + Send + Sync + 'static) -> StorageSystemError {
    StorageSystemError::DeserializationError {
        format: format.extension().to_string(),
        source: Box::new(source),
    }
}

fn serialization_error(format: ConfigFormat, source: impl std::error::Error + Send + Sync + 'static) -> StorageSystemError {
    StorageSystemError::SerializationError {
        format: format.extension().to_string(),
        source: Box::new(source),
    }
}

impl ModuleSystemConfig {
    /// Parses a configuration document
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| deserialization_error(format, e))?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| deserialization_error(format, e))?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| deserialization_error(format, e))?,
        };
        Ok(config)
    }

    pub fn serialize(&self, format: ConfigFormat) -> Result<String> {
        let data = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| serialization_error(format, e))?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| serialization_error(format, e))?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| serialization_error(format, e))?,
        };
        Ok(data)
    }

    /// Loads `path`, choosing the format by extension. A missing file
    /// yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No configuration at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(StorageSystemError::io(e, "read_config", path).into()),
        };
        let config = Self::deserialize(&data, format)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies environment overrides: the release token variable wins over
    /// the configured token.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(RELEASE_TOKEN_ENV) {
            if !token.is_empty() {
                self.updates.token = Some(token);
            }
        }
        self
    }

    /// Makes every relative path absolute against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.modules_path);
        resolve(&mut self.backups_path);
        resolve(&mut self.repository_path);
        resolve(&mut self.locks_path);
        if let Some(temp) = self.temp_path.as_mut() {
            resolve(temp);
        }
        self
    }
}
