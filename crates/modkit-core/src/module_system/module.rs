use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::module_system::error::ModuleSystemError;
use crate::module_system::manifest::{ModuleManifest, ModuleRequirements, ModuleSource};

/// Opaque module identifier, distinct from the business key `name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(Uuid);

impl ModuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validated kebab-case module name (`blog`, `event-calendar`, `shop2`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    pub fn parse(name: &str) -> Result<Self, ModuleSystemError> {
        let invalid = |reason: &str| ModuleSystemError::InvalidModuleName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(invalid("must start with a lowercase letter"));
        }
        if name.ends_with('-') || name.contains("--") {
            return Err(invalid("hyphens must separate non-empty segments"));
        }
        if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `event-calendar` -> `Event Calendar`
    pub fn humanize(&self) -> String {
        humanize(&self.0)
    }
}

/// Title-cases the hyphen-separated segments of a name.
pub fn humanize(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ModuleName {
    type Error = ModuleSystemError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModuleName::parse(&value)
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    #[default]
    Disabled,
    Enabled,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Disabled => f.write_str("disabled"),
            ModuleStatus::Enabled => f.write_str("enabled"),
        }
    }
}

/// Persisted module aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub name: ModuleName,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Raw version string, as declared by the manifest or the last update
    pub version: String,
    #[serde(default)]
    pub requirements: ModuleRequirements,
    pub status: ModuleStatus,
    #[serde(default)]
    pub enabled_at: Option<DateTime<Utc>>,
    pub namespace: String,
    pub provider: String,
    #[serde(default)]
    pub path: PathBuf,
    /// Flat dependency list, honored alongside `requirements.modules`
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub source: Option<ModuleSource>,
    #[serde(default)]
    pub last_update_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Module {
    /// Builds a new, disabled module from a discovered manifest.
    pub fn from_manifest(manifest: &ModuleManifest) -> Result<Self, ModuleSystemError> {
        let name = ModuleName::parse(&manifest.name)?;
        let now = Utc::now();
        Ok(Self {
            id: ModuleId::new(),
            display_name: manifest.description.clone().unwrap_or_else(|| name.humanize()),
            name,
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            version: manifest.version.clone(),
            requirements: manifest.requires.clone(),
            status: ModuleStatus::Disabled,
            enabled_at: None,
            namespace: manifest.namespace.clone(),
            provider: manifest.provider.clone(),
            path: manifest.path.clone(),
            dependencies: manifest.dependencies.clone(),
            source: manifest.source.clone(),
            last_update_check_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ModuleStatus::Enabled
    }

    pub fn is_disabled(&self) -> bool {
        self.status == ModuleStatus::Disabled
    }

    pub fn enable(&mut self) {
        let now = Utc::now();
        self.status = ModuleStatus::Enabled;
        self.enabled_at = Some(now);
        self.updated_at = now;
    }

    pub fn disable(&mut self) {
        self.status = ModuleStatus::Disabled;
        self.enabled_at = None;
        self.updated_at = Utc::now();
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
        self.updated_at = Utc::now();
    }

    pub fn set_source(&mut self, source: Option<ModuleSource>) {
        self.source = source;
        self.updated_at = Utc::now();
    }

    /// The module's directory: `path` when set, else `{modules_root}/{name}`
    pub fn directory(&self, modules_root: &Path) -> PathBuf {
        if self.path.as_os_str().is_empty() {
            modules_root.join(self.name())
        } else {
            self.path.clone()
        }
    }

    pub fn has_update_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn mark_update_checked(&mut self) {
        self.last_update_check_at = Some(Utc::now());
    }

    /// `requirements.modules` followed by `dependencies`, deduplicated by
    /// module name (first occurrence wins).
    pub fn all_requirements(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.requirements
            .modules
            .iter()
            .chain(self.dependencies.iter())
            .filter(|req| {
                let name = req.split(':').next().unwrap_or(req).trim();
                !name.is_empty() && seen.insert(name.to_string())
            })
            .cloned()
            .collect()
    }

    /// True when either dependency channel names `target`
    pub fn depends_on(&self, target: &str) -> bool {
        self.requirements
            .modules
            .iter()
            .chain(self.dependencies.iter())
            .any(|req| req.split(':').next().map(str::trim) == Some(target))
    }
}
