use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Find files recursively in a directory that match a predicate.
/// Results are sorted so callers get a stable order.
pub fn find_files<P, F>(path: P, predicate: &F) -> io::Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
    F: Fn(&Path) -> bool + ?Sized,
{
    let path = path.as_ref();
    let mut result = Vec::new();

    if !path.exists() {
        return Ok(result);
    }
    if path.is_file() {
        if predicate(path) {
            result.push(path.to_path_buf());
        }
        return Ok(result);
    }

    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            result.append(&mut find_files(&entry_path, predicate)?);
        } else if entry_path.is_file() && predicate(&entry_path) {
            result.push(entry_path);
        }
    }
    result.sort();
    Ok(result)
}

/// Every directory below `path` (not `path` itself), sorted; parents come
/// before their children.
pub fn find_dirs<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    let path = path.as_ref();
    if !path.is_dir() {
        return Ok(result);
    }
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            result.push(entry_path.clone());
            result.append(&mut find_dirs(&entry_path)?);
        }
    }
    result.sort();
    Ok(result)
}

/// Total size in bytes of all files below `path`
pub fn dir_size<P: AsRef<Path>>(path: P) -> io::Result<u64> {
    find_files(path, &|_: &Path| true)?
        .iter()
        .map(|file| fs::metadata(file).map(|m| m.len()))
        .sum()
}

/// Recursively copies `from` into `to`, creating `to` if needed
pub fn copy_dir_all<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Moves a directory, falling back to copy-then-delete when a rename is not
/// possible (e.g. across filesystems). A partial copy is removed on failure.
pub fn move_dir<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                rename_err
            );
            if let Err(copy_err) = copy_dir_all(from, to) {
                let _ = fs::remove_dir_all(to);
                return Err(copy_err);
            }
            fs::remove_dir_all(from)
        }
    }
}

/// Writes `contents` to `path` through a temp file in the same directory,
/// replacing the target atomically.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut temp_file = NamedTempFile::new_in(&parent)?;
    temp_file.write_all(contents)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Replaces `target` with the directory `replacement`.
///
/// The current `target` is first renamed aside; if moving the replacement
/// in fails it is renamed back, so `target` is never left missing.
pub fn replace_dir<P: AsRef<Path>, Q: AsRef<Path>>(replacement: P, target: Q) -> io::Result<()> {
    let (replacement, target) = (replacement.as_ref(), target.as_ref());
    if !target.exists() {
        return move_dir(replacement, target);
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let aside = target.with_file_name(format!(".{}.replaced-{}", file_name, uuid::Uuid::new_v4().simple()));
    fs::rename(target, &aside)?;

    if let Err(e) = move_dir(replacement, target) {
        let _ = fs::remove_dir_all(target);
        fs::rename(&aside, target)?;
        return Err(e);
    }
    if let Err(e) = fs::remove_dir_all(&aside) {
        log::warn!("Failed to remove replaced directory {}: {}", aside.display(), e);
    }
    Ok(())
}
