//! Persistence contract for module records, with an in-memory store and a
//! single-document JSON file store.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::kernel::error::{Error, Result};
use crate::module_system::error::ModuleSystemError;
use crate::module_system::module::{Module, ModuleId};
use crate::storage::error::StorageSystemError;
use crate::utils::fs::write_atomic;

#[async_trait]
pub trait ModuleRepository: Send + Sync {
    async fn find_by_id(&self, id: &ModuleId) -> Result<Option<Module>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Module>>;

    /// All modules ordered by name
    async fn find_all(&self) -> Result<Vec<Module>>;

    async fn find_enabled(&self) -> Result<Vec<Module>> {
        Ok(self.find_all().await?.into_iter().filter(Module::is_enabled).collect())
    }

    async fn find_disabled(&self) -> Result<Vec<Module>> {
        Ok(self.find_all().await?.into_iter().filter(Module::is_disabled).collect())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    /// Inserts or replaces the record with the same id. Fails when another
    /// record already uses the same name.
    async fn save(&self, module: &Module) -> Result<()>;

    /// Removes the record; returns whether it existed
    async fn delete(&self, id: &ModuleId) -> Result<bool>;
}

fn check_unique_name(records: &HashMap<ModuleId, Module>, module: &Module) -> Result<()> {
    let clash = records
        .values()
        .any(|existing| existing.name == module.name && existing.id != module.id);
    if clash {
        return Err(ModuleSystemError::RegistrationError {
            module: module.name().to_string(),
            message: "a module with this name is already registered".to_string(),
        }
        .into());
    }
    Ok(())
}

fn sorted_by_name(records: &HashMap<ModuleId, Module>) -> Vec<Module> {
    let mut modules: Vec<Module> = records.values().cloned().collect();
    modules.sort_by(|a, b| a.name.cmp(&b.name));
    modules
}

#[derive(Debug, Default)]
pub struct InMemoryModuleRepository {
    records: RwLock<HashMap<ModuleId, Module>>,
}

impl InMemoryModuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn find_by_id(&self, id: &ModuleId) -> Result<Option<Module>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Module>> {
        Ok(self.records.read().await.values().find(|m| m.name() == name).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Module>> {
        Ok(sorted_by_name(&*self.records.read().await))
    }

    async fn save(&self, module: &Module) -> Result<()> {
        let mut records = self.records.write().await;
        check_unique_name(&records, module)?;
        records.insert(module.id, module.clone());
        Ok(())
    }

    async fn delete(&self, id: &ModuleId) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoryDocument {
    #[serde(default)]
    modules: Vec<Module>,
}

/// Keeps all records in one JSON document, rewritten atomically on every
/// mutation. The document is loaded lazily on first access.
#[derive(Debug)]
pub struct JsonFileModuleRepository {
    path: PathBuf,
    records: RwLock<Option<HashMap<ModuleId, Module>>>,
}

impl JsonFileModuleRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<HashMap<ModuleId, Module>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::io(e, "read_module_repository", &self.path)),
        };
        let document: RepositoryDocument =
            serde_json::from_str(&content).map_err(|e| StorageSystemError::DeserializationError {
                format: "JSON".to_string(),
                source: Box::new(e),
            })?;
        Ok(document.modules.into_iter().map(|m| (m.id, m)).collect())
    }

    async fn write_document(&self, records: &HashMap<ModuleId, Module>) -> Result<()> {
        let document = RepositoryDocument {
            modules: sorted_by_name(records),
        };
        let json = serde_json::to_vec_pretty(&document).map_err(|e| StorageSystemError::SerializationError {
            format: "JSON".to_string(),
            source: Box::new(e),
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json).map_err(|e| Error::io(e, "write_module_repository", &path)))
            .await
            .map_err(|e| Error::Other(format!("Repository write task failed: {}", e)))?
    }

    /// Runs `f` against the loaded records, loading them first if needed.
    async fn with_records<T>(&self, f: impl FnOnce(&HashMap<ModuleId, Module>) -> T) -> Result<T> {
        {
            let guard = self.records.read().await;
            if let Some(records) = guard.as_ref() {
                return Ok(f(records));
            }
        }
        let mut guard = self.records.write().await;
        if guard.is_none() {
            *guard = Some(self.read_document().await?);
        }
        Ok(f(guard.get_or_insert_with(HashMap::new)))
    }
}

#[async_trait]
impl ModuleRepository for JsonFileModuleRepository {
    async fn find_by_id(&self, id: &ModuleId) -> Result<Option<Module>> {
        self.with_records(|records| records.get(id).cloned()).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Module>> {
        self.with_records(|records| records.values().find(|m| m.name() == name).cloned())
            .await
    }

    async fn find_all(&self) -> Result<Vec<Module>> {
        self.with_records(sorted_by_name).await
    }

    async fn save(&self, module: &Module) -> Result<()> {
        let mut guard = self.records.write().await;
        let mut records = match guard.take() {
            Some(records) => records,
            None => self.read_document().await?,
        };
        let result = match check_unique_name(&records, module) {
            Ok(()) => {
                let previous = records.insert(module.id, module.clone());
                let written = self.write_document(&records).await;
                if written.is_err() {
                    // keep memory in line with the file
                    match previous {
                        Some(previous) => records.insert(module.id, previous),
                        None => records.remove(&module.id),
                    };
                }
                written
            }
            Err(e) => Err(e),
        };
        *guard = Some(records);
        result
    }

    async fn delete(&self, id: &ModuleId) -> Result<bool> {
        let mut guard = self.records.write().await;
        let mut records = match guard.take() {
            Some(records) => records,
            None => self.read_document().await?,
        };
        let result = match records.remove(id) {
            Some(removed) => match self.write_document(&records).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    records.insert(removed.id, removed);
                    Err(e)
                }
            },
            None => Ok(false),
        };
        *guard = Some(records);
        result
    }
}
