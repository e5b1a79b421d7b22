use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::MODULE_MANIFEST_FILE;

/// Version assumed when a discovered manifest omits it
pub const DEFAULT_MANIFEST_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to parse module manifest '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Module manifest '{path}' is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("Failed to serialize module manifest: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Host requirements declared under `requires`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRequirements {
    /// Host runtime constraint (`requires.php`)
    #[serde(rename = "php", alias = "runtime", default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Host framework constraint (`requires.laravel`)
    #[serde(rename = "laravel", alias = "framework", default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    /// Required modules, each `name` or `name:constraint`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,

    /// Required host extensions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

impl ModuleRequirements {
    pub fn is_empty(&self) -> bool {
        self.runtime.is_none() && self.framework.is_none() && self.modules.is_empty() && self.extensions.is_empty()
    }
}

/// Remote release coordinates (`owner/repo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub owner: String,
    pub repo: String,
}

impl ModuleSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// `owner/repo`, used as cache key and in log lines
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Parsed `module.json` descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "ModuleRequirements::is_empty")]
    pub requires: ModuleRequirements,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ModuleSource>,

    /// Directory holding the manifest
    #[serde(skip)]
    pub path: PathBuf,
}

// Everything optional; the two parse modes decide what is mandatory.
#[derive(Debug, Default, Deserialize)]
struct RawModuleManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    requires: Option<ModuleRequirements>,
    #[serde(default)]
    dependencies: Option<Vec<String>>,
    #[serde(default)]
    source: Option<ModuleSource>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ModuleManifest {
    /// Lenient parse used during discovery. A missing name falls back to the
    /// directory name and a missing version to `1.0.0`.
    pub fn parse_lenient(json: &str, module_dir: &Path) -> Result<Self, ManifestError> {
        let raw = Self::parse_raw(json, module_dir)?;
        let dir_name = module_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name: non_empty(raw.name).unwrap_or(dir_name),
            version: non_empty(raw.version).unwrap_or_else(|| DEFAULT_MANIFEST_VERSION.to_string()),
            namespace: raw.namespace.unwrap_or_default(),
            provider: raw.provider.unwrap_or_default(),
            description: non_empty(raw.description),
            author: non_empty(raw.author),
            requires: raw.requires.unwrap_or_default(),
            dependencies: raw.dependencies.unwrap_or_default(),
            source: raw.source,
            path: module_dir.to_path_buf(),
        })
    }

    /// Strict parse used on install: `name`, `version`, `namespace` and
    /// `provider` must all be present and non-empty.
    pub fn parse_strict(json: &str, module_dir: &Path) -> Result<Self, ManifestError> {
        let raw = Self::parse_raw(json, module_dir)?;
        let missing = |field: &'static str| ManifestError::MissingField {
            path: module_dir.join(MODULE_MANIFEST_FILE),
            field,
        };

        Ok(Self {
            name: non_empty(raw.name).ok_or_else(|| missing("name"))?,
            version: non_empty(raw.version).ok_or_else(|| missing("version"))?,
            namespace: non_empty(raw.namespace).ok_or_else(|| missing("namespace"))?,
            provider: non_empty(raw.provider).ok_or_else(|| missing("provider"))?,
            description: non_empty(raw.description),
            author: non_empty(raw.author),
            requires: raw.requires.unwrap_or_default(),
            dependencies: raw.dependencies.unwrap_or_default(),
            source: raw.source,
            path: module_dir.to_path_buf(),
        })
    }

    fn parse_raw(json: &str, module_dir: &Path) -> Result<RawModuleManifest, ManifestError> {
        serde_json::from_str(json).map_err(|source| ManifestError::Parse {
            path: module_dir.join(MODULE_MANIFEST_FILE),
            source,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(ManifestError::Serialize)
    }

    /// Path of the `module.json` file
    pub fn manifest_file(&self) -> PathBuf {
        self.path.join(MODULE_MANIFEST_FILE)
    }
}

/// Builder for module manifests
pub struct ManifestBuilder {
    manifest: ModuleManifest,
}

impl ManifestBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            manifest: ModuleManifest {
                name: name.to_string(),
                version: version.to_string(),
                namespace: String::new(),
                provider: String::new(),
                description: None,
                author: None,
                requires: ModuleRequirements::default(),
                dependencies: Vec::new(),
                source: None,
                path: PathBuf::new(),
            },
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.manifest.namespace = namespace.to_string();
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.manifest.provider = provider.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.manifest.description = Some(description.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.manifest.author = Some(author.to_string());
        self
    }

    /// Add a `name` or `name:constraint` module requirement
    pub fn requires_module(mut self, requirement: &str) -> Self {
        self.manifest.requires.modules.push(requirement.to_string());
        self
    }

    pub fn requires_runtime(mut self, constraint: &str) -> Self {
        self.manifest.requires.runtime = Some(constraint.to_string());
        self
    }

    pub fn requires_framework(mut self, constraint: &str) -> Self {
        self.manifest.requires.framework = Some(constraint.to_string());
        self
    }

    pub fn requires_extension(mut self, extension: &str) -> Self {
        self.manifest.requires.extensions.push(extension.to_string());
        self
    }

    /// Add an entry to the flat `dependencies` list
    pub fn dependency(mut self, name: &str) -> Self {
        self.manifest.dependencies.push(name.to_string());
        self
    }

    pub fn source(mut self, owner: &str, repo: &str) -> Self {
        self.manifest.source = Some(ModuleSource::new(owner, repo));
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest.path = path.into();
        self
    }

    pub fn build(self) -> ModuleManifest {
        self.manifest
    }
}
