use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Error type for version and constraint parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Invalid version format: '{0}'")]
    InvalidFormat(String),

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },
}

/// Semantic version of a module.
///
/// Parsing is lenient: a leading `v` is dropped, partial inputs such as
/// `1.2` are zero-filled, and anything past the first three numeric groups
/// is ignored. The pre-release tag is kept for display only; ordering and
/// equality look at `major.minor.patch` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleVersion {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Option<String>,
}

impl ModuleVersion {
    /// Creates a release version without pre-release tag
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch, pre: None }
    }

    /// Parses `X.Y.Z[-prerelease][+build]`
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if raw.is_empty() {
            return Err(VersionError::InvalidFormat(input.to_string()));
        }

        let without_build = raw.split_once('+').map_or(raw, |(head, _)| head);
        let (core, pre) = match without_build.split_once('-') {
            Some((head, tag)) if !tag.is_empty() => (head, Some(tag.to_string())),
            Some((head, _)) => (head, None),
            None => (without_build, None),
        };

        let numbers = core
            .split('.')
            .take(3)
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<u64>, _>>()
            .map_err(|_| VersionError::InvalidFormat(input.to_string()))?;

        Ok(Self {
            major: numbers.first().copied().unwrap_or(0),
            minor: numbers.get(1).copied().unwrap_or(0),
            patch: numbers.get(2).copied().unwrap_or(0),
            pre,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Pre-release tag, if any (`beta.1` for `1.0.0-beta.1`)
    pub fn prerelease(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Numeric part as `major.minor.patch`
    pub fn value(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// Returns a copy with the patch number incremented
    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }

    /// True when moving from `self` to `target` crosses a major version
    pub fn is_major_bump_to(&self, target: &ModuleVersion) -> bool {
        target.major > self.major
    }

    /// Numeric-only `semver::Version`, used for constraint matching
    pub fn to_semver(&self) -> Version {
        Version::new(self.major, self.minor, self.patch)
    }

    /// Evaluates a constraint, surfacing parse failures.
    pub fn try_satisfies(&self, constraint: &str) -> Result<bool, VersionError> {
        Ok(VersionConstraint::parse(constraint)?.matches(self))
    }

    /// Evaluates a constraint. A malformed constraint never matches.
    pub fn satisfies(&self, constraint: &str) -> bool {
        self.try_satisfies(constraint).unwrap_or(false)
    }
}

/// Checks a raw version string against a constraint, failing closed when
/// either side does not parse.
pub fn version_satisfies(version: &str, constraint: &str) -> bool {
    match ModuleVersion::parse(version) {
        Ok(v) => v.satisfies(constraint),
        Err(e) => {
            log::debug!("Treating unparsable version '{}' as unsatisfied: {}", version, e);
            false
        }
    }
}

impl PartialEq for ModuleVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModuleVersion {}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for ModuleVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch).hash(state);
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for ModuleVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleVersion::parse(s)
    }
}

impl TryFrom<String> for ModuleVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModuleVersion::parse(&value)
    }
}

impl From<ModuleVersion> for String {
    fn from(version: ModuleVersion) -> Self {
        version.to_string()
    }
}

/// A version constraint expression.
///
/// Supports caret (`^1.2.3`), tilde (`~1.2.3`), comparison operators
/// (`>=`, `<=`, `>`, `<`, `=`), bare versions (exact match), wildcards,
/// comma- or space-separated conjunctions and `||` alternatives.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0 <3.0")
    constraint: String,
    /// One parsed requirement per `||` alternative
    alternatives: Vec<VersionReq>,
}

impl VersionConstraint {
    /// Parses a constraint expression.
    pub fn parse(constraint: &str) -> Result<Self, VersionError> {
        let invalid = |message: String| VersionError::InvalidConstraint {
            constraint: constraint.to_string(),
            message,
        };

        if constraint.trim().is_empty() {
            return Err(invalid("empty constraint".to_string()));
        }

        let mut alternatives = Vec::new();
        for alternative in constraint.split("||") {
            let normalized = normalize_alternative(alternative).map_err(invalid)?;
            let req = VersionReq::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
            alternatives.push(req);
        }

        Ok(Self {
            constraint: constraint.trim().to_string(),
            alternatives,
        })
    }

    /// Checks whether a version satisfies any alternative of this constraint.
    pub fn matches(&self, version: &ModuleVersion) -> bool {
        let version = version.to_semver();
        self.alternatives.iter().any(|req| req.matches(&version))
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '^' | '~')
}

/// Rewrites one `||` alternative into `semver` comparator syntax: operators
/// separated from their version by whitespace are rejoined, bare versions
/// become exact matches and comparators are comma-joined.
fn normalize_alternative(alternative: &str) -> Result<String, String> {
    let mut comparators = Vec::new();
    let mut pending_operator: Option<String> = None;

    let tokens = alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty());

    for token in tokens {
        if token.chars().all(is_operator_char) {
            pending_operator.get_or_insert_with(String::new).push_str(token);
            continue;
        }
        let comparator = match pending_operator.take() {
            Some(op) => format!("{}{}", op, token),
            None => token.to_string(),
        };
        comparators.push(normalize_comparator(&comparator));
    }

    if let Some(op) = pending_operator {
        return Err(format!("operator '{}' is missing a version", op));
    }
    if comparators.is_empty() {
        return Err("empty constraint".to_string());
    }
    Ok(comparators.join(", "))
}

fn normalize_comparator(raw: &str) -> String {
    let split_at = raw.find(|c: char| !is_operator_char(c)).unwrap_or(raw.len());
    let (op, version) = raw.split_at(split_at);
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);

    let is_wildcard = version == "*"
        || version.split('.').any(|part| matches!(part, "*" | "x" | "X"));
    let op = match op {
        "" if is_wildcard => "",
        "" | "==" => "=",
        other => other,
    };
    if op == "=" && !is_wildcard {
        return format!("={}", zero_fill(version));
    }
    format!("{}{}", op, version)
}

/// Pads a partial version to three numeric components so `=1.0` means
/// exactly `1.0.0` rather than the range `1.0.x`.
fn zero_fill(version: &str) -> String {
    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(core_end);
    let missing = 3usize.saturating_sub(core.split('.').count());
    format!("{}{}{}", core, ".0".repeat(missing), suffix)
}
