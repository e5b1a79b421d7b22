use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use crate::module_system::backup::{BackupError, BackupStore};
use crate::module_system::integrity::ContentHash;

use super::common::{manifest_json, write_module_dir};

#[tokio::test]
async fn test_create_list_and_restore() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(&dir.path().join("modules"), "blog", &manifest_json("blog", "1.0.0"));
    fs::write(module.join("README.md"), "v1").unwrap();
    let before = ContentHash::of_dir(&module).unwrap();

    let store = BackupStore::new(dir.path().join("backups"), 5);
    let backup = store.create_backup("blog", "1.0.0", &module).await.unwrap();
    assert_eq!(backup.module, "blog");
    assert_eq!(backup.version, "1.0.0");
    assert!(backup.size > 0);
    assert!(backup.path.starts_with(store.root()));

    fs::write(module.join("README.md"), "v2").unwrap();
    fs::write(module.join("extra.txt"), "added later").unwrap();
    assert_ne!(ContentHash::of_dir(&module).unwrap(), before);

    store.restore_backup(&backup.path, &module).await.unwrap();
    assert_eq!(ContentHash::of_dir(&module).unwrap(), before);
    assert!(!module.join("extra.txt").exists());
}

#[tokio::test]
async fn test_restore_keeps_empty_directories() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(&dir.path().join("modules"), "blog", &manifest_json("blog", "1.0.0"));
    fs::create_dir_all(module.join("database/migrations")).unwrap();

    let store = BackupStore::new(dir.path().join("backups"), 5);
    let backup = store.create_backup("blog", "1.0.0", &module).await.unwrap();

    fs::remove_dir_all(module.join("database")).unwrap();
    store.restore_backup(&backup.path, &module).await.unwrap();
    assert!(module.join("database/migrations").is_dir());
    assert!(module.join("module.json").is_file());
}

#[tokio::test]
async fn test_unusual_versions_stay_listed() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "my_blog", &manifest_json("my_blog", "1.0.0"));
    let store = BackupStore::new(dir.path().join("backups"), 2);

    let odd = store.create_backup("my_blog", "1.0.0++x", &module).await.unwrap();
    assert_eq!(odd.version, "1.0.0++x");
    tokio::time::sleep(Duration::from_millis(2)).await;
    store.create_backup("my_blog", "2.0.0_rc/1", &module).await.unwrap();

    let listed = store.list_backups("my_blog").await.unwrap();
    let versions: Vec<&str> = listed.iter().map(|b| b.version.as_str()).collect();
    assert_eq!(versions, vec!["2.0.0_rc/1", "1.0.0++x"]);
    assert!(listed.iter().all(|b| b.path.parent() == Some(store.root())));

    // the odd names still count toward retention
    tokio::time::sleep(Duration::from_millis(2)).await;
    store.create_backup("my_blog", "3.0.0", &module).await.unwrap();
    assert_eq!(store.list_backups("my_blog").await.unwrap().len(), 2);
    assert!(!odd.path.exists());
}

#[tokio::test]
async fn test_retention_keeps_newest() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    let store = BackupStore::new(dir.path().join("backups"), 2);

    let mut created = Vec::new();
    for version in ["1.0.0", "1.1.0", "1.2.0", "1.3.0"] {
        created.push(store.create_backup("blog", version, &module).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let listed = store.list_backups("blog").await.unwrap();
    let versions: Vec<&str> = listed.iter().map(|b| b.version.as_str()).collect();
    assert_eq!(versions, vec!["1.3.0", "1.2.0"]);
    assert!(!created[0].path.exists());
    assert_eq!(store.backup_size("blog").await.unwrap(), listed.iter().map(|b| b.size).sum::<u64>());
}

#[tokio::test]
async fn test_zero_retention_keeps_everything() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    let store = BackupStore::new(dir.path().join("backups"), 0);
    for _ in 0..3 {
        store.create_backup("blog", "1.0.0", &module).await.unwrap();
    }
    assert_eq!(store.list_backups("blog").await.unwrap().len(), 3);
    assert_eq!(store.cleanup("blog").await.unwrap(), 0);
}

#[tokio::test]
async fn test_listing_is_per_module() {
    let dir = tempdir().unwrap();
    let blog = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    let shop = write_module_dir(dir.path(), "shop", &manifest_json("shop", "1.0.0"));
    let store = BackupStore::new(dir.path().join("backups"), 5);
    store.create_backup("blog", "1.0.0", &blog).await.unwrap();
    store.create_backup("shop", "1.0.0", &shop).await.unwrap();
    fs::write(store.root().join("notes.txt"), "ignored").unwrap();

    let listed = store.list_backups("blog").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].module, "blog");
}

#[tokio::test]
async fn test_missing_inputs_are_not_found() {
    let dir = tempdir().unwrap();
    let store = BackupStore::new(dir.path().join("backups"), 5);

    assert!(store.list_backups("blog").await.unwrap().is_empty());
    assert!(matches!(
        store.create_backup("blog", "1.0.0", &dir.path().join("nope")).await,
        Err(BackupError::NotFound(_))
    ));
    assert!(matches!(
        store.restore_backup(&dir.path().join("nope.zip"), &dir.path().join("blog")).await,
        Err(BackupError::NotFound(_))
    ));
    assert!(matches!(
        store.delete_backup(&dir.path().join("nope.zip")).await,
        Err(BackupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_backup() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    let store = BackupStore::new(dir.path().join("backups"), 5);
    let backup = store.create_backup("blog", "1.0.0", &module).await.unwrap();

    store.delete_backup(&backup.path).await.unwrap();
    assert!(store.list_backups("blog").await.unwrap().is_empty());
}
