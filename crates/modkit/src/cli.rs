use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Modkit: discovery, dependency checks, install and self-update of feature modules
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Print "pong" and exit without touching the host
    #[arg(long)]
    pub ping: bool,

    /// Configuration file (.json, .yaml, .yml or .toml); relative paths
    /// resolve against --base-dir
    #[arg(long, short = 'c', default_value = "modkit.json")]
    pub config: PathBuf,

    /// Directory every relative configured path resolves against
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging unless RUST_LOG is set
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl CliArgs {
    pub fn config_path(&self) -> PathBuf {
        if self.config.is_absolute() {
            self.config.clone()
        } else {
            self.base_dir.join(&self.config)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register new modules found on disk and sync changed versions
    Discover,
    /// List known modules
    List {
        /// Only enabled modules
        #[arg(long)]
        enabled: bool,
    },
    /// Enable a module after checking its requirements
    Enable { name: String },
    /// Disable a module no enabled module depends on
    Disable { name: String },
    /// Check a module's requirements against the enabled modules
    CheckDeps { name: String },
    /// Install a module from a ZIP archive
    Install { archive: PathBuf },
    /// Generate a new module skeleton
    Make {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long = "module-version")]
        module_version: Option<String>,
    },
    /// Remove a disabled module and its files
    Uninstall { name: String },
    /// Apply a module's schema migrations
    Migrate { name: String },
    /// Roll back a module's schema migrations
    MigrateRollback {
        name: String,
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Seed a module's data
    Seed { name: String },
    /// Set or clear the release source of a module
    SetSource {
        name: String,
        /// `owner/repo`; omit to clear
        source: Option<String>,
    },
    /// Describe the available update of a module
    PreviewUpdate {
        name: String,
        #[arg(long)]
        prerelease: bool,
    },
    /// Update a module to its newest release
    Update {
        name: String,
        /// Consider prereleases regardless of configuration
        #[arg(long)]
        prerelease: bool,
    },
    /// Force-release a stuck update lock
    CancelUpdate { name: String },
    /// Check every module with a release source for updates
    CheckUpdates {
        /// Bypass cached release data
        #[arg(long)]
        force: bool,
    },
    /// Restore a module from one of its backups
    Rollback { name: String, backup: PathBuf },
    /// List a module's backups, newest first
    Backups { name: String },
    /// Delete one backup archive
    DeleteBackup { path: PathBuf },
    /// Run the post-update health probes against an installed module
    HealthCheck { name: String },
    /// Print the effective configuration
    Config {
        #[arg(long, value_enum, default_value_t = ConfigOutput::Json)]
        format: ConfigOutput,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigOutput {
    Json,
    Yaml,
    Toml,
}

/// `owner/repo` into its two parts
pub fn parse_source(value: &str) -> Result<(String, String), String> {
    match value.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(format!("expected OWNER/REPO, got '{}'", value)),
    }
}
