use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::error::FetchError;
use crate::registry::{Column, RecordFields, TableHandle, TableStore, TableUpdate};

const REGISTRY_FILE: &str = "registry.json";

/// Table store persisted as a single JSON document under `root`.
pub struct FileTableStore {
    root: Utf8PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    tables: Vec<StoredTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTable {
    id: String,
    project: String,
    name: String,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    records: BTreeMap<String, RecordFields>,
}

impl StoredTable {
    fn handle(&self) -> TableHandle {
        TableHandle {
            id: self.id.clone(),
            project: self.project.clone(),
            name: self.name.clone(),
        }
    }
}

impl FileTableStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn default_root() -> Result<Utf8PathBuf, FetchError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_dir().join("sra-fetch").join("registry")).ok()
            })
            .ok_or_else(|| FetchError::Filesystem("unable to resolve data directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn registry_path(&self) -> Utf8PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn columns(&self, table_id: &str) -> Result<Vec<Column>, FetchError> {
        let registry = self.load()?;
        find_table(&registry, table_id).map(|table| table.columns.clone())
    }

    pub fn record(&self, table_id: &str, key: &str) -> Result<Option<RecordFields>, FetchError> {
        let registry = self.load()?;
        find_table(&registry, table_id).map(|table| table.records.get(key).cloned())
    }

    pub fn record_count(&self, table_id: &str) -> Result<usize, FetchError> {
        let registry = self.load()?;
        find_table(&registry, table_id).map(|table| table.records.len())
    }

    fn load(&self) -> Result<RegistryFile, FetchError> {
        let path = self.registry_path();
        if !path.as_std_path().exists() {
            return Ok(RegistryFile::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| FetchError::Registry(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| FetchError::Registry(format!("parse {path}: {err}")))
    }

    fn save(&self, registry: &RegistryFile) -> Result<(), FetchError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(registry)
            .map_err(|err| FetchError::Registry(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("registry")
            .suffix(".tmp")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        temp.persist(self.registry_path().as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn with_registry<T>(
        &self,
        mutate: impl FnOnce(&mut RegistryFile) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| FetchError::Registry("registry lock poisoned".to_string()))?;
        let mut registry = self.load()?;
        let value = mutate(&mut registry)?;
        self.save(&registry)?;
        Ok(value)
    }
}

impl TableStore for FileTableStore {
    fn get_table(&self, id: &str) -> Result<Option<TableHandle>, FetchError> {
        let registry = self.load()?;
        Ok(registry
            .tables
            .iter()
            .find(|table| table.id == id)
            .map(StoredTable::handle))
    }

    fn list_tables(&self, project: &str) -> Result<Vec<TableHandle>, FetchError> {
        let registry = self.load()?;
        Ok(registry
            .tables
            .iter()
            .filter(|table| table.project == project)
            .map(StoredTable::handle)
            .collect())
    }

    fn create_table(&self, project: &str, name: &str) -> Result<Option<TableHandle>, FetchError> {
        self.with_registry(|registry| {
            registry.next_id += 1;
            let table = StoredTable {
                id: registry.next_id.to_string(),
                project: project.to_string(),
                name: name.to_string(),
                columns: Vec::new(),
                records: BTreeMap::new(),
            };
            let handle = table.handle();
            registry.tables.push(table);
            tracing::info!(table = %handle.id, project, name, "created registry table");
            Ok(Some(handle))
        })
    }

    fn apply(&self, table: &TableHandle, update: TableUpdate) -> Result<(), FetchError> {
        self.with_registry(|registry| {
            let stored = registry
                .tables
                .iter_mut()
                .find(|stored| stored.id == table.id)
                .ok_or_else(|| FetchError::Registry(format!("table {} not found", table.id)))?;

            for column in update.columns() {
                if !stored.columns.iter().any(|existing| existing.name == column.name) {
                    stored.columns.push(column.clone());
                }
            }

            for (key, fields) in update.records() {
                if let Some(unknown) = fields
                    .keys()
                    .find(|name| !stored.columns.iter().any(|column| &column.name == *name))
                {
                    return Err(FetchError::Registry(format!(
                        "record {key} sets unknown column `{unknown}` on table {}",
                        table.id
                    )));
                }
                let record = stored.records.entry(key.clone()).or_default();
                for (name, value) in fields {
                    record.insert(name.clone(), value.clone());
                }
            }
            Ok(())
        })
    }
}

fn find_table<'a>(registry: &'a RegistryFile, id: &str) -> Result<&'a StoredTable, FetchError> {
    registry
        .tables
        .iter()
        .find(|table| table.id == id)
        .ok_or_else(|| FetchError::Registry(format!("table {id} not found")))
}
