/// Application name
pub const APP_NAME: &str = "modkit";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the descriptor file every module directory carries
pub const MODULE_MANIFEST_FILE: &str = "module.json";

/// Default modules directory, relative to the base directory
pub const DEFAULT_MODULES_DIR: &str = "modules";

/// Default backup store, relative to the base directory
pub const DEFAULT_BACKUPS_DIR: &str = "storage/module-backups";

/// Default persisted module store
pub const DEFAULT_REPOSITORY_FILE: &str = "storage/modules.json";

/// Default directory for advisory lock files
pub const DEFAULT_LOCKS_DIR: &str = "storage/locks";

/// Upload ceiling for module archives (50 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Number of backups kept per module
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Lease of the per-module update lock, in seconds
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 600;

/// Time-to-live of cached release lookups, in seconds
pub const DEFAULT_RELEASE_CACHE_TTL_SECS: u64 = 3600;

/// Timeout for release API and download requests, in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Release API endpoint
pub const DEFAULT_RELEASE_API_BASE: &str = "https://api.github.com";

/// Environment variable overriding the release API token
pub const RELEASE_TOKEN_ENV: &str = "MODKIT_GITHUB_TOKEN";

/// Module names that can never be installed or scaffolded
pub const RESERVED_MODULE_NAMES: &[&str] = &[
    "core", "admin", "system", "app", "api", "auth", "config", "vendor", "module", "modules",
    "public", "storage", "resources", "database", "routes", "bootstrap", "tests",
];
