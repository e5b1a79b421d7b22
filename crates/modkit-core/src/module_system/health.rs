//! Post-update structural checks of a module tree.
//!
//! Three probes run independently: the declared provider resolves, route
//! definition files parse, and admin-resource definition files parse.
//! Absent route or resource files pass trivially.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::utils::fs::find_files;

/// Resolves a module's bootstrap entry point by name
pub trait EntryPointResolver: Send + Sync {
    /// Forget anything loaded by previous checks
    fn reset(&self) {}

    fn class_exists(&self, name: &str) -> bool;

    /// Includes a source file so the names it defines become resolvable
    fn load(&self, path: &Path) -> Result<(), String>;

    fn is_subclass_of(&self, name: &str, base: &str) -> bool;
}

/// Last segment of a qualified name (`Acme\Blog\BlogServiceProvider`)
pub fn short_name(qualified: &str) -> &str {
    qualified
        .rsplit(['\\', ':', '.', '/'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(qualified)
}

/// Resolver backed by the module's source files: a name exists once a file
/// defining it has been loaded.
#[derive(Debug, Default)]
pub struct SourceTreeResolver {
    loaded: Mutex<HashMap<String, String>>,
}

impl SourceTreeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_loaded<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        let mut guard = self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl EntryPointResolver for SourceTreeResolver {
    fn reset(&self) {
        self.with_loaded(|loaded| loaded.clear());
    }

    fn class_exists(&self, name: &str) -> bool {
        self.with_loaded(|loaded| loaded.contains_key(short_name(name)))
    }

    fn load(&self, path: &Path) -> Result<(), String> {
        let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| format!("{} has no file name", path.display()))?;
        if !content.contains(&stem) {
            return Err(format!("{} does not define '{}'", path.display(), stem));
        }
        self.with_loaded(|loaded| loaded.insert(stem, content));
        Ok(())
    }

    fn is_subclass_of(&self, name: &str, base: &str) -> bool {
        self.with_loaded(|loaded| {
            loaded
                .get(short_name(name))
                .is_some_and(|content| content.contains(base))
        })
    }
}

/// Checks a definition file for syntax errors
pub trait SyntaxChecker: Send + Sync {
    fn check(&self, path: &Path) -> Result<(), String>;
}

/// Parses JSON, TOML and YAML files with their parsers; any other file must
/// have balanced brackets outside of strings and comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredSyntaxChecker;

impl SyntaxChecker for StructuredSyntaxChecker {
    fn check(&self, path: &Path) -> Result<(), String> {
        let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "json" => serde_json::from_str::<serde_json::Value>(&content)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            #[cfg(feature = "toml-config")]
            "toml" => toml::from_str::<toml::Value>(&content)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(&content)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            _ => check_balanced(&content),
        }
    }
}

/// Bracket balance check that skips quoted strings, `//` and `#` line
/// comments and `/* */` block comments.
pub fn check_balanced(source: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '"' | '\'' | '`' => {
                let quote = c;
                let start = line;
                let mut closed = false;
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            if chars.next() == Some('\n') {
                                line += 1;
                            }
                        }
                        '\n' => line += 1,
                        s if s == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(format!("unterminated string starting on line {}", start));
                }
            }
            '#' => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let start = line;
                let mut prev = '\0';
                let mut closed = false;
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                    }
                    if prev == '*' && s == '/' {
                        closed = true;
                        break;
                    }
                    prev = s;
                }
                if !closed {
                    return Err(format!("unterminated comment starting on line {}", start));
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "unexpected '{}' on line {} (unclosed '{}' from line {})",
                            c, line, open, open_line
                        ))
                    }
                    None => return Err(format!("unexpected '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, open_line)) => Err(format!("unclosed '{}' from line {}", open, open_line)),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub provider_loaded: bool,
    pub routes_valid: bool,
    pub resources_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl HealthCheckResult {
    pub fn passes(&self) -> bool {
        self.provider_loaded && self.routes_valid && self.resources_valid
    }

    /// Every reason the check failed, including route and resource
    /// failures recorded as warnings once the provider loaded.
    pub fn into_failures(self) -> Vec<String> {
        let mut failures = self.errors;
        failures.extend(self.warnings);
        failures
    }
}

/// Where the checker looks inside a module directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckLayout {
    pub provider_dirs: Vec<String>,
    pub route_dirs: Vec<String>,
    pub resource_dirs: Vec<String>,
    /// Base the provider must extend, when set
    #[serde(default)]
    pub provider_base: Option<String>,
}

impl Default for HealthCheckLayout {
    fn default() -> Self {
        Self {
            provider_dirs: vec!["src".to_string()],
            route_dirs: vec!["routes".to_string()],
            resource_dirs: vec!["src/Filament/Resources".to_string()],
            provider_base: None,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    resolver: Arc<dyn EntryPointResolver>,
    syntax: Arc<dyn SyntaxChecker>,
    layout: HealthCheckLayout,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(
            Arc::new(SourceTreeResolver::new()),
            Arc::new(StructuredSyntaxChecker),
            HealthCheckLayout::default(),
        )
    }
}

impl HealthChecker {
    pub fn new(resolver: Arc<dyn EntryPointResolver>, syntax: Arc<dyn SyntaxChecker>, layout: HealthCheckLayout) -> Self {
        Self { resolver, syntax, layout }
    }

    pub fn with_layout(layout: HealthCheckLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Runs all probes against `module_dir`. Blocking.
    pub fn check(&self, module_name: &str, provider: &str, module_dir: &Path) -> HealthCheckResult {
        let mut result = HealthCheckResult::default();

        if !module_dir.is_dir() {
            result
                .errors
                .push(format!("Module directory {} does not exist", module_dir.display()));
            return result;
        }

        result.provider_loaded = self.check_provider(provider, module_dir, &mut result.errors);

        let route_failures = self.check_definitions(module_dir, &self.layout.route_dirs);
        result.routes_valid = route_failures.is_empty();
        let resource_failures = self.check_definitions(module_dir, &self.layout.resource_dirs);
        result.resources_valid = resource_failures.is_empty();

        let target = if result.provider_loaded {
            &mut result.warnings
        } else {
            &mut result.errors
        };
        target.extend(route_failures.into_iter().map(|f| format!("Route file {}", f)));
        target.extend(resource_failures.into_iter().map(|f| format!("Resource file {}", f)));

        if result.passes() {
            log::debug!("Health check passed for module '{}'", module_name);
        } else {
            log::warn!(
                "Health check failed for module '{}': {:?} {:?}",
                module_name,
                result.errors,
                result.warnings
            );
        }
        result
    }

    fn check_provider(&self, provider: &str, module_dir: &Path, errors: &mut Vec<String>) -> bool {
        if provider.trim().is_empty() {
            errors.push("Module declares no provider".to_string());
            return false;
        }
        self.resolver.reset();

        if !self.resolver.class_exists(provider) {
            let short = short_name(provider);
            let candidate = self.provider_candidates(module_dir, short).into_iter().next();
            match candidate {
                Some(path) => {
                    if let Err(e) = self.resolver.load(&path) {
                        errors.push(format!("Provider '{}' failed to load: {}", provider, e));
                        return false;
                    }
                }
                None => {
                    errors.push(format!("Provider '{}' not found in module sources", provider));
                    return false;
                }
            }
        }

        if !self.resolver.class_exists(provider) {
            errors.push(format!("Provider '{}' could not be resolved", provider));
            return false;
        }
        if let Some(base) = &self.layout.provider_base {
            if !self.resolver.is_subclass_of(provider, base) {
                errors.push(format!("Provider '{}' does not extend '{}'", provider, base));
                return false;
            }
        }
        true
    }

    fn provider_candidates(&self, module_dir: &Path, short: &str) -> Vec<PathBuf> {
        self.layout
            .provider_dirs
            .iter()
            .flat_map(|dir| {
                find_files(module_dir.join(dir), &|p: &Path| {
                    p.file_stem().is_some_and(|stem| stem == short)
                })
                .unwrap_or_default()
            })
            .collect()
    }

    /// `"<path>: <message>"` for each definition file that fails to parse
    fn check_definitions(&self, module_dir: &Path, dirs: &[String]) -> Vec<String> {
        let mut failures = Vec::new();
        for dir in dirs {
            let files = match find_files(module_dir.join(dir), &|_: &Path| true) {
                Ok(files) => files,
                Err(e) => {
                    failures.push(format!("{}: {}", dir, e));
                    continue;
                }
            };
            for file in files {
                if let Err(message) = self.syntax.check(&file) {
                    let relative = file.strip_prefix(module_dir).unwrap_or(&file);
                    failures.push(format!("{}: {}", relative.display(), message));
                }
            }
        }
        failures
    }
}
