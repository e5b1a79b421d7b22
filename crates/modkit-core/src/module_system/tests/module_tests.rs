use std::path::{Path, PathBuf};

use crate::module_system::error::ModuleSystemError;
use crate::module_system::manifest::ManifestBuilder;
use crate::module_system::module::{humanize, Module, ModuleName, ModuleStatus};

use super::common::module;

#[test]
fn test_module_name_validation() {
    for valid in ["blog", "event-calendar", "shop2", "a-b-c"] {
        assert!(ModuleName::parse(valid).is_ok(), "{valid} should be valid");
    }
    for invalid in ["", "Blog", "2shop", "-blog", "blog-", "blog--posts", "blog_posts", "blog posts"] {
        assert!(
            matches!(ModuleName::parse(invalid), Err(ModuleSystemError::InvalidModuleName { .. })),
            "{invalid:?} should be rejected"
        );
    }
}

#[test]
fn test_humanize() {
    assert_eq!(humanize("event-calendar"), "Event Calendar");
    assert_eq!(ModuleName::parse("blog").unwrap().humanize(), "Blog");
}

#[test]
fn test_from_manifest_starts_disabled() {
    let manifest = ManifestBuilder::new("event-calendar", "1.2.0")
        .namespace("Modules\\EventCalendar")
        .provider("Modules\\EventCalendar\\Provider")
        .path("/modules/event-calendar")
        .build();
    let module = Module::from_manifest(&manifest).unwrap();

    assert_eq!(module.name(), "event-calendar");
    assert_eq!(module.display_name, "Event Calendar");
    assert_eq!(module.status, ModuleStatus::Disabled);
    assert!(module.enabled_at.is_none());
    assert_eq!(module.path, PathBuf::from("/modules/event-calendar"));
}

#[test]
fn test_from_manifest_rejects_bad_name() {
    let manifest = ManifestBuilder::new("Bad Name", "1.0.0").build();
    assert!(Module::from_manifest(&manifest).is_err());
}

#[test]
fn test_enable_and_disable_track_timestamp() {
    let mut m = module("blog", "1.0.0", &[], &[]);
    m.enable();
    assert!(m.is_enabled());
    assert!(m.enabled_at.is_some());
    m.disable();
    assert!(m.is_disabled());
    assert!(m.enabled_at.is_none());
}

#[test]
fn test_all_requirements_merges_channels_first_wins() {
    let m = module("blog", "1.0.0", &["users:^1.0", "media"], &["users", "tags", ""]);
    assert_eq!(m.all_requirements(), vec!["users:^1.0", "media", "tags"]);
    assert!(m.depends_on("tags"));
    assert!(m.depends_on("users"));
    assert!(!m.depends_on("use"));
}

#[test]
fn test_directory_falls_back_to_modules_root() {
    let m = module("blog", "1.0.0", &[], &[]);
    assert_eq!(m.directory(Path::new("/srv/modules")), PathBuf::from("/srv/modules/blog"));

    let mut placed = m.clone();
    placed.path = PathBuf::from("/elsewhere/blog");
    assert_eq!(placed.directory(Path::new("/srv/modules")), PathBuf::from("/elsewhere/blog"));
}

#[test]
fn test_status_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&ModuleStatus::Enabled).unwrap(), "\"enabled\"");
    assert_eq!(ModuleStatus::Disabled.to_string(), "disabled");
}
