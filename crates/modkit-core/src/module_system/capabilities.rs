//! # Capability Registry
//!
//! Process-scoped collections that enabled modules contribute to and the
//! host reads: navigation entries, permissions, named routes and slot
//! contributions. Every entry remembers its owning module so a module's
//! contributions can be withdrawn as a unit when it is disabled.
//!
//! Keys are unique per kind: navigation and permission keys, route names,
//! and `(slot, key)` pairs. Registering a key owned by another module is a
//! [`ModuleSystemError::CapabilityConflict`]; the owner registering it again
//! replaces its own entry.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kernel::error::Result;
use crate::module_system::error::ModuleSystemError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub key: String,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub sort: i32,
    /// Permission required to see the entry
    #[serde(default)]
    pub permission: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    pub action: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Content a module places into a named extension point of the host UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotContribution {
    pub slot: String,
    pub key: String,
    pub content: String,
    #[serde(default)]
    pub sort: i32,
}

/// An entry together with the module that registered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owned<T> {
    pub owner: String,
    pub item: T,
}

/// Declarative bundle of contributions, e.g. deserialized from a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub navigation: Vec<NavigationItem>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
    #[serde(default)]
    pub slots: Vec<SlotContribution>,
}

impl CapabilitySet {
    pub fn is_empty(&self) -> bool {
        self.navigation.is_empty() && self.permissions.is_empty() && self.routes.is_empty() && self.slots.is_empty()
    }

    /// Registers every entry for `module`, stopping at the first conflict.
    pub fn register_into(&self, module: &str, registry: &mut CapabilityRegistry) -> Result<()> {
        for item in &self.permissions {
            registry.register_permission(module, item.clone())?;
        }
        for item in &self.navigation {
            registry.register_navigation(module, item.clone())?;
        }
        for item in &self.routes {
            registry.register_route(module, item.clone())?;
        }
        for item in &self.slots {
            registry.register_slot(module, item.clone())?;
        }
        Ok(())
    }
}

/// Number of entries a module owns, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionCounts {
    pub navigation: usize,
    pub permissions: usize,
    pub routes: usize,
    pub slots: usize,
}

impl ContributionCounts {
    pub fn total(&self) -> usize {
        self.navigation + self.permissions + self.routes + self.slots
    }
}

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    navigation: BTreeMap<String, Owned<NavigationItem>>,
    permissions: BTreeMap<String, Owned<Permission>>,
    routes: BTreeMap<String, Owned<RouteDefinition>>,
    slots: BTreeMap<(String, String), Owned<SlotContribution>>,
}

fn insert_owned<K: Ord + Clone + fmt::Display, T>(
    map: &mut BTreeMap<K, Owned<T>>,
    kind: &'static str,
    key: K,
    module: &str,
    item: T,
) -> Result<()> {
    if let Some(existing) = map.get(&key) {
        if existing.owner != module {
            return Err(ModuleSystemError::CapabilityConflict {
                kind,
                key: key.to_string(),
                owner: existing.owner.clone(),
            }
            .into());
        }
    }
    map.insert(
        key,
        Owned {
            owner: module.to_string(),
            item,
        },
    );
    Ok(())
}

// Display for the composite slot key used in conflict messages.
struct SlotKey(String, String);

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_navigation(&mut self, module: &str, item: NavigationItem) -> Result<()> {
        insert_owned(&mut self.navigation, "navigation item", item.key.clone(), module, item)
    }

    pub fn register_permission(&mut self, module: &str, item: Permission) -> Result<()> {
        insert_owned(&mut self.permissions, "permission", item.key.clone(), module, item)
    }

    pub fn register_route(&mut self, module: &str, item: RouteDefinition) -> Result<()> {
        insert_owned(&mut self.routes, "route", item.name.clone(), module, item)
    }

    pub fn register_slot(&mut self, module: &str, item: SlotContribution) -> Result<()> {
        let key = (item.slot.clone(), item.key.clone());
        if let Some(existing) = self.slots.get(&key) {
            if existing.owner != module {
                return Err(ModuleSystemError::CapabilityConflict {
                    kind: "slot contribution",
                    key: SlotKey(key.0, key.1).to_string(),
                    owner: existing.owner.clone(),
                }
                .into());
            }
        }
        self.slots.insert(
            key,
            Owned {
                owner: module.to_string(),
                item,
            },
        );
        Ok(())
    }

    /// Removes everything `module` registered; returns how many entries
    /// were dropped.
    pub fn unregister_module(&mut self, module: &str) -> usize {
        let before = self.len();
        self.navigation.retain(|_, e| e.owner != module);
        self.permissions.retain(|_, e| e.owner != module);
        self.routes.retain(|_, e| e.owner != module);
        self.slots.retain(|_, e| e.owner != module);
        let removed = before - self.len();
        if removed > 0 {
            log::debug!("Unregistered {} capability entries of module '{}'", removed, module);
        }
        removed
    }

    /// Navigation ordered by group, then sort weight, then label
    pub fn navigation(&self) -> Vec<&NavigationItem> {
        let mut items: Vec<&NavigationItem> = self.navigation.values().map(|e| &e.item).collect();
        items.sort_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then(a.sort.cmp(&b.sort))
                .then_with(|| a.label.cmp(&b.label))
        });
        items
    }

    /// Navigation visible to a holder of `granted` permissions
    pub fn navigation_for(&self, granted: &[&str]) -> Vec<&NavigationItem> {
        self.navigation()
            .into_iter()
            .filter(|item| item.permission.as_deref().map_or(true, |p| granted.contains(&p)))
            .collect()
    }

    pub fn permissions(&self) -> Vec<&Permission> {
        self.permissions.values().map(|e| &e.item).collect()
    }

    pub fn permission(&self, key: &str) -> Option<&Permission> {
        self.permissions.get(key).map(|e| &e.item)
    }

    pub fn routes(&self) -> Vec<&RouteDefinition> {
        self.routes.values().map(|e| &e.item).collect()
    }

    pub fn route(&self, name: &str) -> Option<&RouteDefinition> {
        self.routes.get(name).map(|e| &e.item)
    }

    /// Contributions to `slot`, ordered by sort weight then key
    pub fn slot(&self, slot: &str) -> Vec<&SlotContribution> {
        let mut items: Vec<&SlotContribution> = self
            .slots
            .values()
            .filter(|e| e.item.slot == slot)
            .map(|e| &e.item)
            .collect();
        items.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.key.cmp(&b.key)));
        items
    }

    /// Module owning the route named `name`
    pub fn route_owner(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(|e| e.owner.as_str())
    }

    pub fn contributions_of(&self, module: &str) -> ContributionCounts {
        ContributionCounts {
            navigation: self.navigation.values().filter(|e| e.owner == module).count(),
            permissions: self.permissions.values().filter(|e| e.owner == module).count(),
            routes: self.routes.values().filter(|e| e.owner == module).count(),
            slots: self.slots.values().filter(|e| e.owner == module).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.navigation.len() + self.permissions.len() + self.routes.len() + self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.navigation.clear();
        self.permissions.clear();
        self.routes.clear();
        self.slots.clear();
    }
}

/// A module's hook into the capability registry.
///
/// Contributors are registered with the host per module name and invoked
/// for enabled modules in dependency order.
pub trait ModuleContributor: Send + Sync {
    fn module(&self) -> &str;

    fn contribute(&self, registry: &mut CapabilityRegistry) -> Result<()>;
}

/// Contributor backed by a fixed [`CapabilitySet`]
#[derive(Debug, Clone)]
pub struct StaticContributor {
    module: String,
    capabilities: CapabilitySet,
}

impl StaticContributor {
    pub fn new(module: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            module: module.into(),
            capabilities,
        }
    }
}

impl ModuleContributor for StaticContributor {
    fn module(&self) -> &str {
        &self.module
    }

    fn contribute(&self, registry: &mut CapabilityRegistry) -> Result<()> {
        self.capabilities.register_into(&self.module, registry)
    }
}

/// Runs `contributor` as one unit: on failure its partial entries are
/// withdrawn again.
pub fn apply_contributor(contributor: &dyn ModuleContributor, registry: &mut CapabilityRegistry) -> Result<()> {
    if let Err(e) = contributor.contribute(registry) {
        registry.unregister_module(contributor.module());
        return Err(e);
    }
    Ok(())
}
