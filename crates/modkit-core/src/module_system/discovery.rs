use std::path::{Path, PathBuf};

use tokio::fs;

use crate::kernel::constants::MODULE_MANIFEST_FILE;
use crate::kernel::error::{Error, Result};
use crate::module_system::manifest::ModuleManifest;

/// Scans a modules directory for `module.json` descriptors
#[derive(Debug, Clone)]
pub struct ModuleDiscovery {
    root: PathBuf,
}

impl ModuleDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parses the manifest of every immediate subdirectory, ordered by
    /// directory name.
    ///
    /// A missing root yields an empty list and directories without a
    /// manifest are skipped. A manifest that fails to parse aborts the scan.
    pub async fn discover(&self) -> Result<Vec<ModuleManifest>> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            log::debug!("Modules directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::io(e, "read_dir", &self.root))?;

        let mut module_dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(e, "read_dir_entry", &self.root))?
        {
            let path = entry.path();
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => module_dirs.push(path),
                Ok(_) => {}
                Err(e) => log::warn!("Failed to get metadata for {}: {}", path.display(), e),
            }
        }
        module_dirs.sort();

        let mut manifests = Vec::new();
        for dir in module_dirs {
            if let Some(manifest) = Self::load_manifest(&dir).await? {
                manifests.push(manifest);
            }
        }
        log::debug!("Discovered {} module manifest(s) in {}", manifests.len(), self.root.display());
        Ok(manifests)
    }

    /// Reads `{dir}/module.json` leniently. `Ok(None)` when the file is absent.
    pub async fn load_manifest(dir: &Path) -> Result<Option<ModuleManifest>> {
        let manifest_path = dir.join(MODULE_MANIFEST_FILE);
        let is_file = fs::metadata(&manifest_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Ok(None);
        }

        let content = fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| Error::io(e, "read_manifest", &manifest_path))?;
        Ok(Some(ModuleManifest::parse_lenient(&content, dir)?))
    }
}
