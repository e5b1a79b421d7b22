//! ZIP packing and unpacking of module trees. Blocking; callers run these
//! on the blocking pool.
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::kernel::constants::MODULE_MANIFEST_FILE;
use crate::utils::fs::{find_dirs, find_files};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a valid ZIP archive: {0}")]
    Invalid(#[source] ZipError),

    #[error("archive entry '{0}' escapes the extraction directory")]
    UnsafeEntry(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Opens `archive_path` as a ZIP container. Opening is the validation; the
/// file extension is irrelevant.
pub fn open_zip(archive_path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(archive_path)?;
    ZipArchive::new(file).map_err(ArchiveError::Invalid)
}

/// Extracts every entry of `archive` below `dest`; returns the number of
/// files written.
pub fn extract_zip(archive: &mut ZipArchive<File>, dest: &Path) -> Result<usize, ArchiveError> {
    fs::create_dir_all(dest)?;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(ArchiveError::Invalid)?;
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

/// Packs the contents of `src` (not `src` itself) into a new ZIP at `dest`.
pub fn zip_directory(src: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // directory entries keep empty directories
    for dir in find_dirs(src)? {
        writer
            .add_directory(format!("{}/", entry_name(src, &dir)), options)
            .map_err(ArchiveError::Invalid)?;
    }
    for path in find_files(src, &|_: &Path| true)? {
        let name = entry_name(src, &path);
        writer.start_file(name, options).map_err(ArchiveError::Invalid)?;
        let mut input = File::open(&path)?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.finish().map_err(ArchiveError::Invalid)?;
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

/// Finds the module root of an extracted archive: the directory itself when
/// it holds `module.json`, or its only entry when that is a directory
/// holding `module.json`.
pub fn locate_module_root(extracted: &Path) -> io::Result<Option<PathBuf>> {
    if extracted.join(MODULE_MANIFEST_FILE).is_file() {
        return Ok(Some(extracted.to_path_buf()));
    }

    let entries = fs::read_dir(extracted)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<PathBuf>>>()?;
    match entries.as_slice() {
        [only] if only.is_dir() && only.join(MODULE_MANIFEST_FILE).is_file() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}
