use std::fs;

use tempfile::tempdir;

use crate::module_system::archive::{extract_zip, locate_module_root, open_zip, zip_directory, ArchiveError};
use crate::module_system::integrity::{parse_checksum, ContentHash};

use super::common::{build_zip, manifest_json, write_module_dir};

#[test]
fn test_zip_directory_round_trips_tree() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    fs::create_dir_all(module.join("src/Http")).unwrap();
    fs::write(module.join("src/Http/Controller.php"), "<?php class Controller {}").unwrap();

    let archive = dir.path().join("blog.zip");
    zip_directory(&module, &archive).unwrap();

    let out = dir.path().join("out");
    let written = extract_zip(&mut open_zip(&archive).unwrap(), &out).unwrap();
    assert_eq!(written, 2);
    assert_eq!(ContentHash::of_dir(&out).unwrap(), ContentHash::of_dir(&module).unwrap());
}

#[test]
fn test_zip_directory_keeps_empty_directories() {
    let dir = tempdir().unwrap();
    let module = write_module_dir(dir.path(), "blog", &manifest_json("blog", "1.0.0"));
    fs::create_dir_all(module.join("database/migrations")).unwrap();

    let archive = dir.path().join("blog.zip");
    zip_directory(&module, &archive).unwrap();

    let out = dir.path().join("out");
    assert_eq!(extract_zip(&mut open_zip(&archive).unwrap(), &out).unwrap(), 1);
    assert!(out.join("database/migrations").is_dir());
}

#[test]
fn test_open_rejects_non_zip() {
    let dir = tempdir().unwrap();
    let bogus = dir.path().join("module.zip");
    fs::write(&bogus, "definitely not a zip").unwrap();
    assert!(matches!(open_zip(&bogus), Err(ArchiveError::Invalid(_))));
}

#[test]
fn test_extract_refuses_entries_outside_destination() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("evil.zip");
    build_zip(&archive, &[("../escape.txt", "boom".as_bytes())]);

    let out = dir.path().join("out");
    let result = extract_zip(&mut open_zip(&archive).unwrap(), &out);
    assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_locate_module_root() {
    let dir = tempdir().unwrap();

    let flat = dir.path().join("flat");
    write_module_dir(dir.path(), "flat", "{}");
    assert_eq!(locate_module_root(&flat).unwrap(), Some(flat.clone()));

    let nested = dir.path().join("nested");
    write_module_dir(&nested, "blog-main", "{}");
    assert_eq!(locate_module_root(&nested).unwrap(), Some(nested.join("blog-main")));

    let ambiguous = dir.path().join("ambiguous");
    write_module_dir(&ambiguous, "one", "{}");
    write_module_dir(&ambiguous, "two", "{}");
    assert_eq!(locate_module_root(&ambiguous).unwrap(), None);
}

#[test]
fn test_content_hash_of_bytes_and_files() {
    let hash = ContentHash::compute(b"abc");
    assert_eq!(
        hash.as_str(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert!(hash.verify(b"abc"));
    assert!(!hash.verify(b"abd"));

    let dir = tempdir().unwrap();
    let file = dir.path().join("data.bin");
    fs::write(&file, b"abc").unwrap();
    assert_eq!(ContentHash::of_file(&file).unwrap(), hash);
}

#[test]
fn test_directory_hash_sees_renames_and_edits() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("a.txt"), "one").unwrap();
    let original = ContentHash::of_dir(&tree).unwrap();

    fs::write(tree.join("a.txt"), "two").unwrap();
    let edited = ContentHash::of_dir(&tree).unwrap();
    assert_ne!(original, edited);

    fs::rename(tree.join("a.txt"), tree.join("b.txt")).unwrap();
    assert_ne!(ContentHash::of_dir(&tree).unwrap(), edited);
}

#[test]
fn test_parse_checksum_formats() {
    let digest = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
    let parsed = parse_checksum(&format!("{}  blog-1.2.0.zip\n", digest)).unwrap();
    assert_eq!(parsed, ContentHash::compute(b"abc"));
    assert!(parse_checksum("").is_none());
    assert!(parse_checksum("deadbeef  file.zip").is_none());
}
