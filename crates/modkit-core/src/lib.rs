pub mod event;
pub mod kernel;
pub mod module_system;
pub mod storage;
pub mod utils;

pub use event::{Event, EventDispatcher, ModuleEvent, SharedEventDispatcher};
pub use kernel::error::Error as KernelError;
pub use kernel::{Application, ApplicationBuilder};
pub use module_system::{DefaultModuleManager, Module, ModuleManager, ModuleManifest, ModuleUpdater};
pub use storage::ModuleSystemConfig;
