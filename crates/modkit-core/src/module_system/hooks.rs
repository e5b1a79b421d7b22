//! External collaborators the module host calls into: the schema-apply hook
//! (migrations, rollbacks, seeders) and the enabled-modules cache.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaHookError {
    #[error("module directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("{0}")]
    Failed(String),
}

/// Result of a schema operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOutcome {
    /// Number of steps applied
    Applied(usize),
    /// Nothing ran, e.g. the host is not ready
    Skipped(String),
    Failed(SchemaHookError),
}

impl SchemaOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SchemaOutcome::Failed(_))
    }
}

/// Runs a module's schema changes. Implementations report failures through
/// [`SchemaOutcome::Failed`]; the caller decides whether they are fatal.
#[async_trait]
pub trait SchemaHook: Send + Sync {
    async fn migrate(&self, module: &str, path: &Path) -> SchemaOutcome;

    async fn rollback(&self, module: &str, path: &Path, steps: usize) -> SchemaOutcome;

    async fn seed(&self, module: &str, path: &Path) -> SchemaOutcome;
}

/// Hook for hosts without a schema runner
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSchemaHook;

const HOST_NOT_READY: &str = "host not ready";

#[async_trait]
impl SchemaHook for NoopSchemaHook {
    async fn migrate(&self, _module: &str, _path: &Path) -> SchemaOutcome {
        SchemaOutcome::Skipped(HOST_NOT_READY.to_string())
    }

    async fn rollback(&self, _module: &str, _path: &Path, _steps: usize) -> SchemaOutcome {
        SchemaOutcome::Skipped(HOST_NOT_READY.to_string())
    }

    async fn seed(&self, _module: &str, _path: &Path) -> SchemaOutcome {
        SchemaOutcome::Skipped(HOST_NOT_READY.to_string())
    }
}

/// Runs configured argv templates as child processes.
///
/// Placeholders `{module}`, `{path}` and `{steps}` are substituted per
/// argument. An unset command yields `Skipped`. Successful runs count as
/// one applied step.
#[derive(Debug, Clone, Default)]
pub struct CommandSchemaHook {
    pub migrate_command: Option<Vec<String>>,
    pub rollback_command: Option<Vec<String>>,
    pub seed_command: Option<Vec<String>>,
}

impl CommandSchemaHook {
    pub fn new(
        migrate_command: Option<Vec<String>>,
        rollback_command: Option<Vec<String>>,
        seed_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            migrate_command,
            rollback_command,
            seed_command,
        }
    }

    async fn run(&self, template: Option<&Vec<String>>, module: &str, path: &Path, steps: usize) -> SchemaOutcome {
        let Some(template) = template.filter(|t| !t.is_empty()) else {
            return SchemaOutcome::Skipped("no command configured".to_string());
        };
        if !path.is_dir() {
            return SchemaOutcome::Failed(SchemaHookError::MissingDirectory(path.to_path_buf()));
        }

        let path_str = path.to_string_lossy();
        let steps_str = steps.to_string();
        let argv: Vec<String> = template
            .iter()
            .map(|arg| {
                arg.replace("{module}", module)
                    .replace("{path}", &path_str)
                    .replace("{steps}", &steps_str)
            })
            .collect();

        log::debug!("Running schema command for '{}': {:?}", module, argv);
        let output = match Command::new(&argv[0]).args(&argv[1..]).output().await {
            Ok(output) => output,
            Err(e) => {
                return SchemaOutcome::Failed(SchemaHookError::Failed(format!(
                    "failed to spawn '{}': {}",
                    argv[0], e
                )))
            }
        };

        if output.status.success() {
            SchemaOutcome::Applied(1)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            SchemaOutcome::Failed(SchemaHookError::Failed(format!(
                "'{}' exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl SchemaHook for CommandSchemaHook {
    async fn migrate(&self, module: &str, path: &Path) -> SchemaOutcome {
        self.run(self.migrate_command.as_ref(), module, path, 0).await
    }

    async fn rollback(&self, module: &str, path: &Path, steps: usize) -> SchemaOutcome {
        self.run(self.rollback_command.as_ref(), module, path, steps).await
    }

    async fn seed(&self, module: &str, path: &Path) -> SchemaOutcome {
        self.run(self.seed_command.as_ref(), module, path, 0).await
    }
}

/// Host-side cache of the enabled module set
#[async_trait]
pub trait EnabledModulesCache: Send + Sync {
    async fn invalidate(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopModulesCache;

#[async_trait]
impl EnabledModulesCache for NoopModulesCache {
    async fn invalidate(&self) {}
}
