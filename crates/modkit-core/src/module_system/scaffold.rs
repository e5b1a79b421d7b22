//! Generates the skeleton of a new module inside the modules directory.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{MODULE_MANIFEST_FILE, RESERVED_MODULE_NAMES};
use crate::kernel::error::{Error, Result};
use crate::module_system::installer::InstallError;
use crate::module_system::manifest::{ManifestBuilder, DEFAULT_MANIFEST_VERSION};
use crate::module_system::module::ModuleName;

/// `blog-posts` -> `BlogPosts`
pub fn studly(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaffoldOptions {
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
}

/// A freshly generated module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaffoldedModule {
    pub name: String,
    pub namespace: String,
    pub provider: String,
    pub path: PathBuf,
    /// Created files, relative to `path`
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModuleScaffolder {
    modules_path: PathBuf,
    root_namespace: String,
    forbidden_names: Vec<String>,
}

impl ModuleScaffolder {
    pub fn new(modules_path: impl Into<PathBuf>) -> Self {
        Self {
            modules_path: modules_path.into(),
            root_namespace: "Modules".to_string(),
            forbidden_names: RESERVED_MODULE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn with_root_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.root_namespace = namespace.into();
        self
    }

    pub fn with_forbidden_names(mut self, names: Vec<String>) -> Self {
        self.forbidden_names = names;
        self
    }

    fn validate(&self, name: &str) -> Result<PathBuf> {
        ModuleName::parse(name)?;
        if self.forbidden_names.iter().any(|f| f.eq_ignore_ascii_case(name)) {
            return Err(InstallError::ForbiddenName(name.to_string()).into());
        }
        let target = self.modules_path.join(name);
        if target.exists() {
            return Err(InstallError::AlreadyExists(name.to_string()).into());
        }
        Ok(target)
    }

    /// Creates `{modules}/{name}` with a manifest, provider, route file and
    /// database folders. Nothing is left behind when a write fails.
    pub async fn scaffold(&self, name: &str, options: ScaffoldOptions) -> Result<ScaffoldedModule> {
        let target = self.validate(name)?;
        let class = studly(name);
        let namespace = format!("{}\\{}", self.root_namespace, class);
        let provider_class = format!("{}ServiceProvider", class);
        let provider = format!("{}\\{}", namespace, provider_class);

        let mut builder = ManifestBuilder::new(name, options.version.as_deref().unwrap_or(DEFAULT_MANIFEST_VERSION))
            .namespace(&namespace)
            .provider(&provider);
        if let Some(description) = &options.description {
            builder = builder.description(description);
        }
        if let Some(author) = &options.author {
            builder = builder.author(author);
        }
        let manifest = builder.build().to_json_pretty()?;

        let files: Vec<(PathBuf, String)> = vec![
            (PathBuf::from(MODULE_MANIFEST_FILE), manifest),
            (
                PathBuf::from("src").join(format!("{}.php", provider_class)),
                provider_stub(&namespace, &provider_class, name),
            ),
            (PathBuf::from("routes").join("web.php"), routes_stub(name)),
            (PathBuf::from("database").join("migrations").join(".gitkeep"), String::new()),
            (
                PathBuf::from("database")
                    .join("seeders")
                    .join(format!("{}DatabaseSeeder.php", class)),
                seeder_stub(&namespace, &class),
            ),
        ];

        if let Err(e) = write_files(&target, &files).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&target).await {
                log::warn!("Failed to clean up partial module at {}: {}", target.display(), cleanup);
            }
            return Err(e);
        }

        log::info!("Scaffolded module '{}' at {}", name, target.display());
        Ok(ScaffoldedModule {
            name: name.to_string(),
            namespace,
            provider,
            path: target,
            files: files.into_iter().map(|(path, _)| path).collect(),
        })
    }
}

async fn write_files(root: &Path, files: &[(PathBuf, String)]) -> Result<()> {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, "create_module_dir", parent))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::io(e, "write_module_file", &path))?;
    }
    Ok(())
}

fn provider_stub(namespace: &str, class: &str, name: &str) -> String {
    format!(
        "<?php\n\nnamespace {namespace};\n\nuse Illuminate\\Support\\ServiceProvider;\n\nclass {class} extends ServiceProvider\n{{\n    public function boot(): void\n    {{\n        $this->loadRoutesFrom(__DIR__ . '/../routes/web.php');\n        $this->loadMigrationsFrom(__DIR__ . '/../database/migrations');\n        $this->loadViewsFrom(__DIR__ . '/../resources/views', '{name}');\n    }}\n}}\n"
    )
}

fn routes_stub(name: &str) -> String {
    format!(
        "<?php\n\nuse Illuminate\\Support\\Facades\\Route;\n\nRoute::prefix('{name}')->name('{name}.')->group(function () {{\n}});\n"
    )
}

fn seeder_stub(namespace: &str, class: &str) -> String {
    format!(
        "<?php\n\nnamespace {namespace}\\Database\\Seeders;\n\nuse Illuminate\\Database\\Seeder;\n\nclass {class}DatabaseSeeder extends Seeder\n{{\n    public function run(): void\n    {{\n    }}\n}}\n"
    )
}
