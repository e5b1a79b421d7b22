use std::sync::Arc;

use tempfile::tempdir;

use crate::module_system::error::ModuleSystemError;
use crate::module_system::module::ModuleId;
use crate::module_system::repository::{InMemoryModuleRepository, JsonFileModuleRepository, ModuleRepository};

use super::common::{enabled_module, module};

async fn exercise_repository(repo: Arc<dyn ModuleRepository>) {
    let blog = module("blog", "1.0.0", &[], &[]);
    let users = enabled_module("users", "2.0.0", &[], &[]);
    repo.save(&users).await.unwrap();
    repo.save(&blog).await.unwrap();

    let all = repo.find_all().await.unwrap();
    let names: Vec<&str> = all.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["blog", "users"]);

    assert_eq!(repo.find_by_id(&blog.id).await.unwrap().unwrap().name(), "blog");
    assert!(repo.exists("users").await.unwrap());
    assert!(!repo.exists("shop").await.unwrap());
    assert_eq!(repo.find_enabled().await.unwrap().len(), 1);
    assert_eq!(repo.find_disabled().await.unwrap()[0].name(), "blog");

    let mut updated = blog.clone();
    updated.set_version("1.1.0");
    repo.save(&updated).await.unwrap();
    assert_eq!(repo.find_by_name("blog").await.unwrap().unwrap().version, "1.1.0");
    assert_eq!(repo.find_all().await.unwrap().len(), 2);

    let impostor = module("blog", "9.9.9", &[], &[]);
    let err = repo.save(&impostor).await.unwrap_err();
    assert!(matches!(
        err.as_module_error(),
        Some(ModuleSystemError::RegistrationError { .. })
    ));

    assert!(repo.delete(&blog.id).await.unwrap());
    assert!(!repo.delete(&blog.id).await.unwrap());
    assert!(!repo.delete(&ModuleId::new()).await.unwrap());
    assert!(repo.find_by_name("blog").await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_memory_repository() {
    exercise_repository(Arc::new(InMemoryModuleRepository::new())).await;
}

#[tokio::test]
async fn test_json_file_repository() {
    let dir = tempdir().unwrap();
    exercise_repository(Arc::new(JsonFileModuleRepository::new(dir.path().join("state/modules.json")))).await;
}

#[tokio::test]
async fn test_json_file_repository_persists_across_instances() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modules.json");

    let first = JsonFileModuleRepository::new(&path);
    let users = enabled_module("users", "2.0.0", &["auth:^1.0"], &[]);
    first.save(&users).await.unwrap();

    let second = JsonFileModuleRepository::new(&path);
    let loaded = second.find_by_name("users").await.unwrap().unwrap();
    assert_eq!(loaded, users);
    assert!(loaded.is_enabled());
}

#[tokio::test]
async fn test_json_file_repository_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let repo = JsonFileModuleRepository::new(dir.path().join("none.json"));
    assert!(repo.find_all().await.unwrap().is_empty());
}
