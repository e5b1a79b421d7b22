use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn modkit(base: &Path) -> Command {
    let mut cmd = Command::cargo_bin("modkit").unwrap();
    cmd.arg("--base-dir").arg(base).env_remove("RUST_LOG");
    cmd
}

fn write_manifest(base: &Path, name: &str, requires: &[&str]) {
    let dir = base.join("modules").join(name);
    fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "name": name,
        "version": "1.0.0",
        "namespace": format!("Modules\\{}", name),
        "provider": format!("Modules\\{}\\Provider", name),
        "requires": { "modules": requires },
    });
    fs::write(dir.join("module.json"), manifest.to_string()).unwrap();
}

#[test]
fn test_ping_command() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("modkit")?;
    cmd.arg("--ping");
    cmd.assert().success().stdout(predicate::str::contains("pong"));
    Ok(())
}

#[test]
fn test_no_command_is_a_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No command given"));
    Ok(())
}

#[test]
fn test_list_on_empty_host() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules registered."));
    Ok(())
}

#[test]
fn test_make_enable_and_list() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path())
        .args(["make", "blog-posts", "--description", "Posts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created module 'blog-posts'"));
    assert!(dir.path().join("modules/blog-posts/module.json").is_file());

    modkit(dir.path())
        .args(["enable", "blog-posts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enabled module 'blog-posts' (1.0.0)"));

    let output = modkit(dir.path()).args(["list", "--enabled", "--json"]).output()?;
    assert!(output.status.success());
    let modules: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(modules.as_array().map(Vec::len), Some(1));
    assert_eq!(modules[0]["name"], "blog-posts");
    assert_eq!(modules[0]["status"], "enabled");

    modkit(dir.path())
        .args(["enable", "blog-posts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already enabled"));
    Ok(())
}

#[test]
fn test_unknown_module_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path())
        .args(["enable", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Module not found: 'ghost'"));
    Ok(())
}

#[test]
fn test_discover_and_check_deps() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_manifest(dir.path(), "comments", &["blog"]);

    modkit(dir.path())
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Discovered: comments"));

    modkit(dir.path())
        .args(["check-deps", "comments"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Missing: blog"));

    write_manifest(dir.path(), "blog", &[]);
    modkit(dir.path()).arg("discover").assert().success();
    modkit(dir.path()).args(["enable", "blog"]).assert().success();
    modkit(dir.path())
        .args(["check-deps", "comments"])
        .assert()
        .success()
        .stdout(predicate::str::contains("satisfied"));

    modkit(dir.path()).args(["enable", "comments"]).assert().success();
    modkit(dir.path())
        .args(["disable", "blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("comments"));
    Ok(())
}

#[test]
fn test_health_check_of_scaffolded_module() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path()).args(["make", "shop"]).assert().success();

    modkit(dir.path())
        .args(["health-check", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Provider loaded:  true"));

    fs::remove_dir_all(dir.path().join("modules/shop/src"))?;
    modkit(dir.path())
        .args(["health-check", "shop"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("error: Provider"));
    Ok(())
}

#[test]
fn test_uninstall_removes_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path()).args(["make", "shop"]).assert().success();
    modkit(dir.path())
        .args(["uninstall", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Uninstalled module 'shop'"));
    assert!(!dir.path().join("modules/shop").exists());
    Ok(())
}

#[test]
fn test_update_commands_without_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path()).args(["make", "shop"]).assert().success();

    modkit(dir.path())
        .args(["preview-update", "shop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no update source"));
    modkit(dir.path())
        .args(["backups", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups of 'shop'."));
    modkit(dir.path())
        .args(["check-updates"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules have an update source."));
    modkit(dir.path())
        .args(["cancel-update", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No update of 'shop' is in progress"));
    Ok(())
}

#[test]
fn test_set_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path()).args(["make", "shop"]).assert().success();

    modkit(dir.path())
        .args(["set-source", "shop", "acme/shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("updates from acme/shop"));
    modkit(dir.path())
        .args(["set-source", "shop", "not-a-slug"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OWNER/REPO"));
    modkit(dir.path())
        .args(["set-source", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has no update source"));
    Ok(())
}

#[test]
fn test_config_file_is_honored() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("modkit.json"), r#"{ "modules_path": "extensions" }"#)?;

    let output = modkit(dir.path()).args(["config", "--format", "json"]).output()?;
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let modules_path = config["modules_path"].as_str().unwrap_or_default();
    assert!(modules_path.ends_with("extensions"), "{}", modules_path);

    modkit(dir.path()).args(["make", "blog"]).assert().success();
    assert!(dir.path().join("extensions/blog/module.json").is_file());
    Ok(())
}

#[test]
fn test_unsupported_config_format() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    modkit(dir.path())
        .args(["--config", "modkit.ini", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported configuration format"));
    Ok(())
}
