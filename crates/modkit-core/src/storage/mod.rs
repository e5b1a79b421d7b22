pub mod config;
pub mod error;

pub use config::{ConfigFormat, HealthConfig, InstallerConfig, ModuleSystemConfig, SchemaConfig, UpdatesConfig};
pub use error::StorageSystemError;

#[cfg(test)]
mod tests;
