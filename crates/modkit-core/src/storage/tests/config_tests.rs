use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use crate::kernel::constants::{DEFAULT_BACKUP_RETENTION, DEFAULT_MAX_UPLOAD_SIZE, RELEASE_TOKEN_ENV};
use crate::kernel::error::Error;
use crate::storage::config::{ConfigFormat, ModuleSystemConfig};
use crate::storage::error::StorageSystemError;

#[test]
fn test_format_from_path() {
    assert_eq!(ConfigFormat::from_path(Path::new("modkit.json")), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path(Path::new("MODKIT.JSON")), Some(ConfigFormat::Json));
    #[cfg(feature = "yaml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("modkit.yml")), Some(ConfigFormat::Yaml));
    #[cfg(feature = "toml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("modkit.toml")), Some(ConfigFormat::Toml));
    assert_eq!(ConfigFormat::from_path(Path::new("modkit.ini")), None);
    assert_eq!(ConfigFormat::from_path(Path::new("modkit")), None);
}

#[test]
fn test_defaults() {
    let config = ModuleSystemConfig::default();
    assert_eq!(config.modules_path, PathBuf::from("modules"));
    assert_eq!(config.installer.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
    assert!(config.installer.forbidden_names.iter().any(|n| n == "admin"));
    assert_eq!(config.updates.backup_retention, DEFAULT_BACKUP_RETENTION);
    assert!(config.updates.health_check);
    assert!(config.updates.auto_rollback);
    assert!(!config.updates.include_prerelease);
    assert!(!config.schema.is_configured());
    assert_eq!(config.health.layout().route_dirs, vec!["routes".to_string()]);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = ModuleSystemConfig::load(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, ModuleSystemConfig::default());
}

#[test]
fn test_unsupported_extension() {
    let dir = tempdir().unwrap();
    let err = ModuleSystemConfig::load(&dir.path().join("modkit.ini")).unwrap_err();
    assert!(matches!(
        err,
        Error::StorageSystem(StorageSystemError::UnsupportedConfigFormat(ref ext)) if ext == "ini"
    ));
}

#[test]
fn test_load_partial_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modkit.json");
    fs::write(
        &path,
        r#"{
            "modules_path": "extensions",
            "updates": { "backup_retention": 2, "include_prerelease": true },
            "environment": { "runtime_version": "8.3.1", "extensions": ["pdo", "mbstring"] },
            "schema": { "migrate_command": ["php", "artisan", "migrate", "--path={path}"] }
        }"#,
    )
    .unwrap();

    let config = ModuleSystemConfig::load(&path).unwrap();
    assert_eq!(config.modules_path, PathBuf::from("extensions"));
    assert_eq!(config.updates.backup_retention, 2);
    assert!(config.updates.include_prerelease);
    assert!(config.updates.auto_rollback);
    assert_eq!(config.environment.runtime_version.as_deref(), Some("8.3.1"));
    assert_eq!(config.environment.extensions.len(), 2);
    assert!(config.schema.is_configured());
    assert_eq!(config.backups_path, ModuleSystemConfig::default().backups_path);
}

#[test]
fn test_malformed_document() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modkit.json");
    fs::write(&path, "{ not json").unwrap();

    let err = ModuleSystemConfig::load(&path).unwrap_err();
    assert!(matches!(
        err,
        Error::StorageSystem(StorageSystemError::DeserializationError { ref format, .. }) if format == "json"
    ));
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_load_yaml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modkit.yaml");
    fs::write(
        &path,
        "modules_path: /srv/modules\ninstaller:\n  max_upload_size: 1024\n  forbidden_names: [legacy]\n",
    )
    .unwrap();

    let config = ModuleSystemConfig::load(&path).unwrap();
    assert_eq!(config.modules_path, PathBuf::from("/srv/modules"));
    assert_eq!(config.installer.max_upload_size, 1024);
    assert_eq!(config.installer.forbidden_names, vec!["legacy".to_string()]);
}

#[cfg(feature = "toml-config")]
#[test]
fn test_load_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modkit.toml");
    fs::write(
        &path,
        "temp_path = \"tmp\"\n\n[updates]\nlock_lease_secs = 30\nhealth_check = false\n\n[health]\nresource_dirs = []\n",
    )
    .unwrap();

    let config = ModuleSystemConfig::load(&path).unwrap();
    assert_eq!(config.temp_path, Some(PathBuf::from("tmp")));
    assert_eq!(config.updates.lock_lease().as_secs(), 30);
    assert!(!config.updates.health_check);
    assert!(config.health.layout().resource_dirs.is_empty());
}

#[test]
fn test_serialize_round_trip() {
    let mut config = ModuleSystemConfig::default();
    config.updates.token = Some("secret".to_string());
    config.temp_path = Some(PathBuf::from("/tmp/modkit"));

    let json = config.serialize(ConfigFormat::Json).unwrap();
    assert_eq!(ModuleSystemConfig::deserialize(&json, ConfigFormat::Json).unwrap(), config);

    #[cfg(feature = "yaml-config")]
    {
        let yaml = config.serialize(ConfigFormat::Yaml).unwrap();
        assert_eq!(ModuleSystemConfig::deserialize(&yaml, ConfigFormat::Yaml).unwrap(), config);
    }
}

#[test]
fn test_resolve_paths() {
    let mut config = ModuleSystemConfig::default();
    config.locks_path = PathBuf::from("/var/lock/modkit");
    config.temp_path = Some(PathBuf::from("tmp"));

    let resolved = config.resolve_paths(Path::new("/srv/app"));
    assert_eq!(resolved.modules_path, PathBuf::from("/srv/app/modules"));
    assert_eq!(resolved.repository_path, PathBuf::from("/srv/app/storage/modules.json"));
    assert_eq!(resolved.locks_path, PathBuf::from("/var/lock/modkit"));
    assert_eq!(resolved.temp_path, Some(PathBuf::from("/srv/app/tmp")));
}

#[test]
fn test_token_from_environment() {
    std::env::set_var(RELEASE_TOKEN_ENV, "from-env");
    let config = ModuleSystemConfig::default().with_env_overrides();
    std::env::remove_var(RELEASE_TOKEN_ENV);
    assert_eq!(config.updates.token.as_deref(), Some("from-env"));
}
