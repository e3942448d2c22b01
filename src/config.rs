use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{InputMode, ProjectId, TableSelection};
use crate::error::FetchError;
use crate::executor::ExecutorSettings;
use crate::metadata::default_metadata_fields;
use crate::sra::ToolSettings;
use crate::store::FileTableStore;

pub const DEFAULT_CONFIG_FILE: &str = "sra-fetch.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Option<InputMode>,
    #[serde(default)]
    pub accessions: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub output: Option<Utf8PathBuf>,
    #[serde(default)]
    pub table: Option<TableEntry>,
    #[serde(default)]
    pub executor: Option<ExecutorEntry>,
    #[serde(default)]
    pub metadata_fields: Option<Vec<String>>,
    #[serde(default)]
    pub registry: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TableEntry {
    Create { create: CreateTableEntry },
    Existing { existing: Option<String> },
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateTableEntry {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExecutorEntry {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub prefetch: Option<bool>,
    #[serde(default)]
    pub max_size: Option<String>,
}

/// Command-line values; anything set here wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<InputMode>,
    pub accessions: Vec<String>,
    pub project: Option<String>,
    pub output: Option<Utf8PathBuf>,
    pub table_id: Option<String>,
    pub create_table: Option<String>,
    pub table_project: Option<String>,
    pub no_table: bool,
    pub workers: Option<usize>,
    pub threads: Option<u32>,
    pub memory: Option<String>,
    pub no_prefetch: bool,
    pub registry: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mode: InputMode,
    pub accessions: Option<Vec<String>>,
    pub project: Option<ProjectId>,
    pub output: Utf8PathBuf,
    pub selection: TableSelection,
    pub executor: ExecutorSettings,
    pub tools: ToolSettings,
    pub metadata_fields: Vec<String>,
    pub registry: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| FetchError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>, overrides: Overrides) -> Result<ResolvedConfig, FetchError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, FetchError> {
        let accessions = if overrides.accessions.is_empty() {
            config.accessions
        } else {
            overrides.accessions.clone()
        };
        let project = overrides
            .project
            .clone()
            .or(config.project)
            .map(|value| value.parse::<ProjectId>())
            .transpose()?;

        let mode = overrides.mode.or(config.mode).unwrap_or_else(|| {
            if accessions.is_empty() && project.is_some() {
                InputMode::Project
            } else {
                InputMode::Accessions
            }
        });

        let output = match overrides.output.clone().or(config.output) {
            Some(output) => output,
            None => default_output_root()?,
        };
        let registry = match overrides.registry.clone().or(config.registry) {
            Some(registry) => registry,
            None => FileTableStore::default_root()?,
        };

        let selection = resolve_selection(config.table, &overrides)?;

        let executor_entry = config.executor.unwrap_or_default();
        let defaults = ToolSettings::default();
        let executor = ExecutorSettings {
            workers: overrides
                .workers
                .or(executor_entry.workers)
                .unwrap_or(ExecutorSettings::default().workers),
        };
        let tools = ToolSettings {
            threads: overrides
                .threads
                .or(executor_entry.threads)
                .unwrap_or(defaults.threads),
            memory: overrides
                .memory
                .clone()
                .or(executor_entry.memory)
                .unwrap_or(defaults.memory),
            prefetch: !overrides.no_prefetch && executor_entry.prefetch.unwrap_or(defaults.prefetch),
            max_size: executor_entry.max_size.unwrap_or(defaults.max_size),
        };

        Ok(ResolvedConfig {
            mode,
            accessions: (!accessions.is_empty()).then_some(accessions),
            project,
            output,
            selection,
            executor,
            tools,
            metadata_fields: config
                .metadata_fields
                .unwrap_or_else(default_metadata_fields),
            registry,
        })
    }
}

fn resolve_selection(
    table: Option<TableEntry>,
    overrides: &Overrides,
) -> Result<TableSelection, FetchError> {
    if overrides.table_id.is_some() && overrides.create_table.is_some() {
        return Err(FetchError::Configuration(
            "--table and --create-table are mutually exclusive".to_string(),
        ));
    }
    if overrides.no_table {
        return Ok(TableSelection::None);
    }
    if let Some(table_id) = &overrides.table_id {
        return Ok(TableSelection::UseExisting {
            table_id: Some(table_id.clone()),
        });
    }
    if overrides.create_table.is_some() || overrides.table_project.is_some() {
        return Ok(TableSelection::CreateNew {
            project_id: overrides.table_project.clone(),
            table_name: overrides.create_table.clone(),
        });
    }
    Ok(match table {
        Some(TableEntry::Existing { existing }) => TableSelection::UseExisting { table_id: existing },
        Some(TableEntry::Create { create }) => TableSelection::CreateNew {
            project_id: create.project,
            table_name: create.name,
        },
        None => TableSelection::None,
    })
}

pub fn default_output_root() -> Result<Utf8PathBuf, FetchError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join("SRA FASTQs")).ok())
        .ok_or_else(|| FetchError::Filesystem("unable to resolve home directory".to_string()))
}
