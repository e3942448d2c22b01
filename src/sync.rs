use std::fmt;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::barrier::CompletedBatch;
use crate::domain::{DOWNLOADED_COLUMN, InputMode, ProjectId, TableSelection, experiment_location};
use crate::error::FetchError;
use crate::metadata::{MetadataRow, MetadataTable};
use crate::registry::{ColumnType, FieldValue, RecordFields, TableHandle, TableStore, TableUpdate};
use crate::resolver::row_accessions;

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub mode: InputMode,
    pub project: Option<ProjectId>,
    pub selection: TableSelection,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ExplicitAccessions,
    MissingProject,
    NoTableSelected,
    MissingTableId,
    IncompleteCreateRequest,
    MissingMetadata,
    TableNotFound { table_id: String },
    CreatedTableNotFound { project: String, name: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExplicitAccessions => write!(f, "runs were given explicitly"),
            SkipReason::MissingProject => write!(f, "no project id"),
            SkipReason::NoTableSelected => write!(f, "no registry table selected"),
            SkipReason::MissingTableId => write!(f, "existing table selected without an id"),
            SkipReason::IncompleteCreateRequest => {
                write!(f, "new table requested without both project and name")
            }
            SkipReason::MissingMetadata => write!(f, "no run metadata available"),
            SkipReason::TableNotFound { table_id } => write!(f, "table {table_id} not found"),
            SkipReason::CreatedTableNotFound { project, name } => {
                write!(f, "created table `{name}` not listed in project {project}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Synced {
        table: TableHandle,
        /// Columns upserted by the schema session, whether or not the table
        /// already had them.
        schema_columns: usize,
        records: usize,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub output: Utf8PathBuf,
    #[serde(flatten)]
    pub status: SyncStatus,
}

enum Resolved<'r> {
    Table {
        project: &'r ProjectId,
        metadata: &'r MetadataTable,
        table: TableHandle,
    },
    Skip(SkipReason),
}

pub struct Synchronizer<'a, S: TableStore> {
    store: &'a S,
}

impl<'a, S: TableStore> Synchronizer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Mirrors run metadata into the selected table. Requires the completed
    /// batch so it can only run once every retrieval has finished.
    pub fn sync(
        &self,
        request: &SyncRequest,
        metadata: Option<&MetadataTable>,
        completed: &CompletedBatch,
    ) -> Result<SyncReport, FetchError> {
        let (project, metadata, table) = match self.resolve(request, metadata)? {
            Resolved::Table {
                project,
                metadata,
                table,
            } => (project, metadata, table),
            Resolved::Skip(reason) => {
                tracing::warn!(reason = %reason, "registry sync skipped");
                return Ok(SyncReport {
                    output: request.output.clone(),
                    status: SyncStatus::Skipped { reason },
                });
            }
        };

        if completed.failed() > 0 {
            tracing::warn!(
                failed = completed.failed(),
                "recording intended locations for runs that failed to download"
            );
        }

        let schema_columns = self.ensure_schema(&table, metadata)?;
        let mut records = 0;
        for (index, row) in metadata.rows.iter().enumerate() {
            let update = record_update(row, index, &metadata.columns, request, project)?;
            self.store.apply(&table, update)?;
            records += 1;
        }
        tracing::info!(table = %table.id, schema_columns, records, "registry table synchronized");

        Ok(SyncReport {
            output: request.output.clone(),
            status: SyncStatus::Synced {
                table,
                schema_columns,
                records,
            },
        })
    }

    fn resolve<'r>(
        &self,
        request: &'r SyncRequest,
        metadata: Option<&'r MetadataTable>,
    ) -> Result<Resolved<'r>, FetchError> {
        if request.mode == InputMode::Accessions {
            return Ok(Resolved::Skip(SkipReason::ExplicitAccessions));
        }
        let Some(project) = request.project.as_ref() else {
            return Ok(Resolved::Skip(SkipReason::MissingProject));
        };

        let table = match &request.selection {
            TableSelection::None => return Ok(Resolved::Skip(SkipReason::NoTableSelected)),
            TableSelection::UseExisting { table_id: None } => {
                return Ok(Resolved::Skip(SkipReason::MissingTableId));
            }
            TableSelection::CreateNew {
                project_id: Some(registry_project),
                table_name: Some(name),
            } => {
                // No table is created without rows to put in it.
                if metadata.is_none() {
                    return Ok(Resolved::Skip(SkipReason::MissingMetadata));
                }
                match self.create(registry_project, name)? {
                    Some(table) => table,
                    None => {
                        return Ok(Resolved::Skip(SkipReason::CreatedTableNotFound {
                            project: registry_project.clone(),
                            name: name.clone(),
                        }));
                    }
                }
            }
            TableSelection::CreateNew { .. } => {
                return Ok(Resolved::Skip(SkipReason::IncompleteCreateRequest));
            }
            TableSelection::UseExisting {
                table_id: Some(table_id),
            } => match self.store.get_table(table_id)? {
                Some(table) => table,
                None => {
                    return Ok(Resolved::Skip(SkipReason::TableNotFound {
                        table_id: table_id.clone(),
                    }));
                }
            },
        };

        match metadata {
            Some(metadata) => Ok(Resolved::Table {
                project,
                metadata,
                table,
            }),
            None => Ok(Resolved::Skip(SkipReason::MissingMetadata)),
        }
    }

    fn create(&self, project: &str, name: &str) -> Result<Option<TableHandle>, FetchError> {
        if let Some(table) = self.store.create_table(project, name)? {
            return Ok(Some(table));
        }
        // First match wins when several tables share the name.
        let table = self
            .store
            .list_tables(project)?
            .into_iter()
            .find(|table| table.name == name);
        Ok(table)
    }

    fn ensure_schema(
        &self,
        table: &TableHandle,
        metadata: &MetadataTable,
    ) -> Result<usize, FetchError> {
        let mut update = TableUpdate::new();
        for column in metadata.columns.iter().filter(|c| *c != DOWNLOADED_COLUMN) {
            update.upsert_column(column.as_str(), ColumnType::String);
        }
        update.upsert_column(DOWNLOADED_COLUMN, ColumnType::Location);
        let count = update.columns().len();
        self.store.apply(table, update)?;
        Ok(count)
    }
}

fn record_update(
    row: &MetadataRow,
    index: usize,
    columns: &[String],
    request: &SyncRequest,
    project: &ProjectId,
) -> Result<TableUpdate, FetchError> {
    let (accession, experiment) = row_accessions(row, index)?;

    let mut fields: RecordFields = columns
        .iter()
        .filter(|column| column.as_str() != DOWNLOADED_COLUMN)
        .map(|column| {
            let value = row.get(column).unwrap_or_default().to_string();
            (column.clone(), FieldValue::String(value))
        })
        .collect();
    let location = experiment_location(&request.output, project, &experiment);
    fields.insert(
        DOWNLOADED_COLUMN.to_string(),
        FieldValue::Location(location.into_string()),
    );

    let mut update = TableUpdate::new();
    update.upsert_record(accession.as_str(), fields);
    Ok(update)
}
