use std::any::Any;
use std::path::PathBuf;

use crate::event::Event;

/// Lifecycle notifications emitted by the module host
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleEvent {
    /// A manifest without persisted record was found and registered
    Discovered { name: String, version: String },
    Enabled { name: String },
    Disabled { name: String },
    Installed { name: String, version: String, path: PathBuf },
    Uninstalled { name: String },
    UpdateStarted { name: String, from_version: String, to_version: String },
    UpdateCompleted { name: String, from_version: String, to_version: String },
    UpdateFailed { name: String, error: String },
    /// Health check failed and the pre-update backup was restored
    UpdateRolledBack { name: String, errors: Vec<String> },
}

impl ModuleEvent {
    /// Name of the module the event is about
    pub fn module_name(&self) -> &str {
        match self {
            ModuleEvent::Discovered { name, .. }
            | ModuleEvent::Enabled { name }
            | ModuleEvent::Disabled { name }
            | ModuleEvent::Installed { name, .. }
            | ModuleEvent::Uninstalled { name }
            | ModuleEvent::UpdateStarted { name, .. }
            | ModuleEvent::UpdateCompleted { name, .. }
            | ModuleEvent::UpdateFailed { name, .. }
            | ModuleEvent::UpdateRolledBack { name, .. } => name,
        }
    }
}

impl Event for ModuleEvent {
    fn name(&self) -> &'static str {
        match self {
            ModuleEvent::Discovered { .. } => "module.discovered",
            ModuleEvent::Enabled { .. } => "module.enabled",
            ModuleEvent::Disabled { .. } => "module.disabled",
            ModuleEvent::Installed { .. } => "module.installed",
            ModuleEvent::Uninstalled { .. } => "module.uninstalled",
            ModuleEvent::UpdateStarted { .. } => "module.update_started",
            ModuleEvent::UpdateCompleted { .. } => "module.update_completed",
            ModuleEvent::UpdateFailed { .. } => "module.update_failed",
            ModuleEvent::UpdateRolledBack { .. } => "module.update_rolled_back",
        }
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
