use std::fs;

use tempfile::tempdir;

use crate::module_system::discovery::ModuleDiscovery;

use super::common::{manifest_json, write_module_dir};

#[tokio::test]
async fn test_missing_root_yields_nothing() {
    let dir = tempdir().unwrap();
    let discovery = ModuleDiscovery::new(dir.path().join("absent"));
    assert!(discovery.discover().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_discovers_manifests_in_name_order() {
    let dir = tempdir().unwrap();
    write_module_dir(dir.path(), "shop", &manifest_json("shop", "1.0.0"));
    write_module_dir(dir.path(), "blog", &manifest_json("blog", "2.0.0"));
    fs::create_dir_all(dir.path().join("no-manifest")).unwrap();
    fs::write(dir.path().join("stray.txt"), "not a module").unwrap();

    let manifests = ModuleDiscovery::new(dir.path()).discover().await.unwrap();
    let names: Vec<&str> = manifests.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["blog", "shop"]);
    assert_eq!(manifests[0].path, dir.path().join("blog"));
    assert_eq!(manifests[0].version, "2.0.0");
}

#[tokio::test]
async fn test_lenient_manifest_uses_directory_name() {
    let dir = tempdir().unwrap();
    write_module_dir(dir.path(), "gallery", "{}");

    let manifests = ModuleDiscovery::new(dir.path()).discover().await.unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].name, "gallery");
    assert_eq!(manifests[0].version, "1.0.0");
}

#[tokio::test]
async fn test_broken_manifest_aborts_scan() {
    let dir = tempdir().unwrap();
    write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    write_module_dir(dir.path(), "broken", "{ nope");

    assert!(ModuleDiscovery::new(dir.path()).discover().await.is_err());
}

#[tokio::test]
async fn test_load_manifest_absent_is_none() {
    let dir = tempdir().unwrap();
    assert!(ModuleDiscovery::load_manifest(dir.path()).await.unwrap().is_none());
}
