use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module_system::module::Module;
use crate::module_system::version::version_satisfies;

/// A single `name` or `name:constraint` requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDependency {
    pub name: String,
    pub constraint: Option<String>,
}

impl ModuleDependency {
    /// Parses `name[:constraint]`. Returns `None` for a blank name.
    pub fn parse(requirement: &str) -> Option<Self> {
        let (name, constraint) = match requirement.split_once(':') {
            Some((name, constraint)) => (name, Some(constraint.trim()).filter(|c| !c.is_empty())),
            None => (requirement, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            constraint: constraint.map(str::to_string),
        })
    }

    /// True when `version` meets the constraint (or there is none).
    /// Unparsable versions or constraints never match.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        match &self.constraint {
            Some(constraint) => version_satisfies(version, constraint),
            None => true,
        }
    }
}

impl fmt::Display for ModuleDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{}:{}", self.name, constraint),
            None => write!(f, "{}", self.name),
        }
    }
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Error that can occur when resolving dependencies
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Required module not found: {0}")]
    MissingModule(String),

    #[error("Module version mismatch: '{module}' requires version '{required}' but found '{current}'")]
    IncompatibleVersion {
        module: String,
        required: String,
        current: String,
    },

    /// Modules on the cycle, in traversal order, without the closing repeat
    #[error("Circular dependency detected: {}", format_cycle(.0))]
    CyclicDependency(Vec<String>),

    #[error("Dependency error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMismatch {
    pub required: String,
    pub current: String,
}

/// Outcome of a requirement check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheckResult {
    pub satisfied: bool,
    pub missing: Vec<String>,
    pub version_mismatch: BTreeMap<String, VersionMismatch>,
}

impl DependencyCheckResult {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            ..Default::default()
        }
    }
}

/// Host facts checked against a module's `requires` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEnvironment {
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub framework_version: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Stateless resolver over a set of modules.
///
/// Cycle detection and ordering follow `requirements.modules` edges only;
/// the flat `dependencies` list is honored by satisfaction checks and
/// dependents lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Checks `module.requirements.modules` against `available` by name and
    /// version. Status is not considered.
    pub fn check_satisfied(&self, module: &Module, available: &[Module]) -> DependencyCheckResult {
        self.check_requirements(&module.requirements.modules, available, false)
    }

    /// Checks each `name[:constraint]` requirement against `candidates`.
    /// With `require_enabled`, a disabled candidate counts as missing.
    pub fn check_requirements(
        &self,
        requirements: &[String],
        candidates: &[Module],
        require_enabled: bool,
    ) -> DependencyCheckResult {
        let by_name: HashMap<&str, &Module> = candidates.iter().map(|m| (m.name(), m)).collect();
        let mut result = DependencyCheckResult::default();

        for dependency in requirements.iter().filter_map(|r| ModuleDependency::parse(r)) {
            match by_name.get(dependency.name.as_str()) {
                Some(target) if !require_enabled || target.is_enabled() => {
                    if !dependency.is_satisfied_by(&target.version) {
                        result.version_mismatch.insert(
                            dependency.name.clone(),
                            VersionMismatch {
                                required: dependency.constraint.clone().unwrap_or_default(),
                                current: target.version.clone(),
                            },
                        );
                    }
                }
                _ => result.missing.push(dependency.name.clone()),
            }
        }

        result.satisfied = result.missing.is_empty() && result.version_mismatch.is_empty();
        result
    }

    fn required_names(module: &Module) -> impl Iterator<Item = String> + '_ {
        module
            .requirements
            .modules
            .iter()
            .filter_map(|r| ModuleDependency::parse(r))
            .map(|d| d.name)
    }

    /// Depth-first search with three-colour marking. Edges to modules outside
    /// the set are ignored.
    pub fn detect_circular_dependencies(&self, modules: &[Module]) -> Result<(), DependencyError> {
        let by_name: HashMap<&str, &Module> = modules.iter().map(|m| (m.name(), m)).collect();
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        for module in modules {
            if !marks.contains_key(module.name()) {
                Self::visit_for_cycles(module, &by_name, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit_for_cycles(
        module: &Module,
        by_name: &HashMap<&str, &Module>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<(), DependencyError> {
        let name = module.name().to_string();
        marks.insert(name.clone(), Mark::Visiting);
        stack.push(name.clone());

        for dep_name in Self::required_names(module) {
            let Some(dep) = by_name.get(dep_name.as_str()) else {
                continue;
            };
            match marks.get(&dep_name) {
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| *n == dep_name).unwrap_or(0);
                    return Err(DependencyError::CyclicDependency(stack[start..].to_vec()));
                }
                Some(Mark::Done) => {}
                None => Self::visit_for_cycles(dep, by_name, marks, stack)?,
            }
        }

        stack.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    /// Orders modules so that every module comes after the modules it
    /// requires. Independent modules keep their input order. Fails without
    /// partial output when the graph has a cycle.
    pub fn sort_by_dependencies(&self, modules: &[Module]) -> Result<Vec<Module>, DependencyError> {
        self.detect_circular_dependencies(modules)?;

        let by_name: HashMap<&str, &Module> = modules.iter().map(|m| (m.name(), m)).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut sorted = Vec::with_capacity(modules.len());

        for module in modules {
            Self::visit_in_order(module, &by_name, &mut visited, &mut sorted);
        }
        Ok(sorted)
    }

    fn visit_in_order(
        module: &Module,
        by_name: &HashMap<&str, &Module>,
        visited: &mut HashSet<String>,
        sorted: &mut Vec<Module>,
    ) {
        if !visited.insert(module.name().to_string()) {
            return;
        }
        for dep_name in Self::required_names(module) {
            if let Some(dep) = by_name.get(dep_name.as_str()) {
                Self::visit_in_order(dep, by_name, visited, sorted);
            }
        }
        sorted.push(module.clone());
    }

    /// Every other module that names `target` in either dependency channel.
    pub fn get_dependents<'a>(&self, target: &str, modules: &'a [Module]) -> Vec<&'a Module> {
        modules
            .iter()
            .filter(|m| m.name() != target && m.depends_on(target))
            .collect()
    }

    /// Lists every unmet system requirement; empty means compatible.
    /// An unknown host version fails any constraint placed on it.
    pub fn system_requirement_failures(&self, module: &Module, env: &SystemEnvironment) -> Vec<String> {
        let mut failures = Vec::new();
        let reqs = &module.requirements;

        let checks = [
            ("runtime", &reqs.runtime, &env.runtime_version),
            ("framework", &reqs.framework, &env.framework_version),
        ];
        for (label, constraint, current) in checks {
            let Some(constraint) = constraint else { continue };
            match current {
                Some(current) if version_satisfies(current, constraint) => {}
                Some(current) => failures.push(format!(
                    "{} version {} does not satisfy '{}'",
                    label, current, constraint
                )),
                None => failures.push(format!("{} version is unknown, '{}' required", label, constraint)),
            }
        }

        for extension in &reqs.extensions {
            let available = env.extensions.iter().any(|e| e.eq_ignore_ascii_case(extension));
            if !available {
                failures.push(format!("missing extension '{}'", extension));
            }
        }
        failures
    }

    /// All-or-nothing system requirement check.
    pub fn validate_system_requirements(&self, module: &Module, env: &SystemEnvironment) -> bool {
        self.system_requirement_failures(module, env).is_empty()
    }
}
