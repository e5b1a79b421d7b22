//! Fixtures shared by the module system tests.
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::event::{create_dispatcher, sync_typed_handler, EventResult, ModuleEvent, SharedEventDispatcher};
use crate::module_system::hooks::{SchemaHook, SchemaOutcome};
use crate::module_system::integrity::ContentHash;
use crate::module_system::manifest::{ManifestBuilder, ModuleSource};
use crate::module_system::module::Module;
use crate::module_system::release::{ReleaseError, ReleaseInfo, ReleaseSource};
use crate::module_system::scaffold::studly;

/// Builds a module record with the given requirement lists.
pub fn module(name: &str, version: &str, requires: &[&str], dependencies: &[&str]) -> Module {
    let mut builder = ManifestBuilder::new(name, version)
        .namespace(&format!("Modules\\{}", name))
        .provider(&format!("Modules\\{}\\Provider", name));
    for requirement in requires {
        builder = builder.requires_module(requirement);
    }
    for dependency in dependencies {
        builder = builder.dependency(dependency);
    }
    Module::from_manifest(&builder.build()).expect("valid module name")
}

pub fn enabled_module(name: &str, version: &str, requires: &[&str], dependencies: &[&str]) -> Module {
    let mut module = module(name, version, requires, dependencies);
    module.enable();
    module
}

/// `module.json` content with the four required fields
pub fn manifest_json(name: &str, version: &str) -> String {
    serde_json::json!({
        "name": name,
        "version": version,
        "namespace": format!("Modules\\{}", name),
        "provider": format!("Modules\\{}\\{}ServiceProvider", name, name),
    })
    .to_string()
}

/// Writes `{root}/{dir}/module.json` and returns the module directory.
pub fn write_module_dir(root: &Path, dir: &str, manifest: &str) -> PathBuf {
    let module_dir = root.join(dir);
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("module.json"), manifest).unwrap();
    module_dir
}

/// Writes a module tree the default health check accepts. The provider is
/// `Modules\Demo\{Studly}ServiceProvider`.
pub fn write_healthy_module(root: &Path, name: &str, version: &str) -> PathBuf {
    let provider = format!("{}ServiceProvider", studly(name));
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "namespace": "Modules\\Demo",
        "provider": format!("Modules\\Demo\\{}", provider),
    })
    .to_string();
    let dir = write_module_dir(root, name, &manifest);
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("src").join(format!("{}.php", provider)),
        format!("<?php\nclass {} extends ServiceProvider {{\n}}\n", provider),
    )
    .unwrap();
    fs::create_dir_all(dir.join("routes")).unwrap();
    fs::write(dir.join("routes").join("web.php"), "<?php\nRoute::get('/', fn () => view('home'));\n").unwrap();
    dir
}

/// Writes a ZIP archive holding `entries` (`path`, `content`).
pub fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Zips the contents of `dir` into `dest` with `prefix/` prepended to every
/// entry name.
pub fn zip_dir_with_prefix(dir: &Path, dest: &Path, prefix: &str) {
    let files = crate::utils::fs::find_files(dir, &|_: &Path| true).unwrap();
    let contents: Vec<(String, Vec<u8>)> = files
        .iter()
        .map(|f| {
            let relative = f.strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
            let name = if prefix.is_empty() { relative } else { format!("{}/{}", prefix, relative) };
            (name, fs::read(f).unwrap())
        })
        .collect();
    let entries: Vec<(&str, &[u8])> = contents.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
    build_zip(dest, &entries);
}

/// Collects every [`ModuleEvent`] dispatched through the returned dispatcher.
pub async fn recording_dispatcher() -> (SharedEventDispatcher, Arc<Mutex<Vec<ModuleEvent>>>) {
    let dispatcher = create_dispatcher();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher
        .register_type_handler::<ModuleEvent>(sync_typed_handler(move |event: &ModuleEvent| {
            sink.lock().unwrap().push(event.clone());
            EventResult::Continue
        }))
        .await;
    (dispatcher, seen)
}

pub fn event_names(events: &Arc<Mutex<Vec<ModuleEvent>>>) -> Vec<&'static str> {
    use crate::event::Event;
    events.lock().unwrap().iter().map(|e| e.name()).collect()
}

/// Schema hook returning a fixed outcome and recording its calls.
pub struct RecordingSchemaHook {
    outcome: SchemaOutcome,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl RecordingSchemaHook {
    pub fn new(outcome: SchemaOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, module: &str) -> SchemaOutcome {
        self.calls.lock().unwrap().push((operation.to_string(), module.to_string()));
        self.outcome.clone()
    }
}

#[async_trait]
impl SchemaHook for RecordingSchemaHook {
    async fn migrate(&self, module: &str, _path: &Path) -> SchemaOutcome {
        self.record("migrate", module)
    }

    async fn rollback(&self, module: &str, _path: &Path, _steps: usize) -> SchemaOutcome {
        self.record("rollback", module)
    }

    async fn seed(&self, module: &str, _path: &Path) -> SchemaOutcome {
        self.record("seed", module)
    }
}

/// Release source serving local files instead of a remote API.
#[derive(Default)]
pub struct MockReleaseSource {
    releases: Mutex<HashMap<String, ReleaseInfo>>,
    /// download_url -> local archive
    archives: Mutex<HashMap<String, PathBuf>>,
    /// checksum_url -> published digest
    checksums: Mutex<HashMap<String, ContentHash>>,
    pub lookups: AtomicUsize,
    pub checksum_fetches: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl MockReleaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `archive` as release `version` of `source`.
    pub fn publish(&self, source: &ModuleSource, version: &str, archive: &Path, checksum: Option<ContentHash>) {
        let download_url = format!("mock://{}/{}.zip", source.slug(), version);
        let checksum_url = checksum.as_ref().map(|_| format!("{}.sha256", download_url));
        if let (Some(url), Some(hash)) = (&checksum_url, checksum) {
            self.checksums.lock().unwrap().insert(url.clone(), hash);
        }
        self.archives
            .lock()
            .unwrap()
            .insert(download_url.clone(), archive.to_path_buf());
        self.releases.lock().unwrap().insert(
            source.slug(),
            ReleaseInfo {
                tag_name: format!("v{}", version),
                version: version.to_string(),
                name: Some(format!("Release {}", version)),
                body: None,
                prerelease: version.contains('-'),
                published_at: None,
                download_url,
                checksum_url,
            },
        );
    }
}

#[async_trait]
impl ReleaseSource for MockReleaseSource {
    async fn latest_release(
        &self,
        source: &ModuleSource,
        include_prerelease: bool,
    ) -> Result<Option<ReleaseInfo>, ReleaseError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let release = self.releases.lock().unwrap().get(&source.slug()).cloned();
        Ok(release.filter(|r| include_prerelease || !r.prerelease))
    }

    async fn download(&self, release: &ReleaseInfo, dest: &Path) -> Result<(), ReleaseError> {
        let archive = self
            .archives
            .lock()
            .unwrap()
            .get(&release.download_url)
            .cloned()
            .ok_or_else(|| ReleaseError::Status {
                url: release.download_url.clone(),
                status: 404,
            })?;
        fs::copy(&archive, dest).map_err(|source| ReleaseError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    async fn fetch_checksum(&self, url: &str) -> Result<ContentHash, ReleaseError> {
        self.checksum_fetches.fetch_add(1, Ordering::SeqCst);
        self.checksums
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ReleaseError::InvalidChecksum(url.to_string()))
    }

    async fn invalidate(&self, _source: &ModuleSource) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
