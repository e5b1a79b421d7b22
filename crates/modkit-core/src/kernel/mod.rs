//! # Modkit Kernel
//!
//! The `kernel` module ties the module host together.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Application Bootstrapping**: [`Application`](bootstrap::Application)
//!   wires the repository, schema hook, lock store, release source and event
//!   dispatcher from a [`ModuleSystemConfig`](crate::storage::ModuleSystemConfig),
//!   and boots the capability registry from the enabled modules.
//! - **Core Constants**: default paths, limits and reserved names in the
//!   `constants` submodule.
//! - **Error Handling**: the crate-wide [`Error`](error::Error) and `Result`
//!   alias in the `error` submodule.
pub mod bootstrap;
pub mod constants;
pub mod error;

pub use bootstrap::{Application, ApplicationBuilder, BootReport};
pub use error::{Error, Result};
