use camino::Utf8PathBuf;

use crate::domain::{
    EXPERIMENT_ACCESSION_FIELD, ExperimentAccession, InputMode, ProjectId, RUN_ACCESSION_FIELD,
    RetrievalTask, RunAccession, experiment_location,
};
use crate::error::FetchError;
use crate::metadata::{MetadataClient, MetadataRow, MetadataTable};

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub mode: InputMode,
    pub accessions: Option<Vec<String>>,
    pub project: Option<ProjectId>,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub tasks: Vec<RetrievalTask>,
    /// Present only in project mode, row-aligned with `tasks`.
    pub metadata: Option<MetadataTable>,
}

pub struct Resolver<'a, M: MetadataClient> {
    metadata: &'a M,
}

impl<'a, M: MetadataClient> Resolver<'a, M> {
    pub fn new(metadata: &'a M) -> Self {
        Self { metadata }
    }

    pub fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, FetchError> {
        match request.mode {
            InputMode::Accessions => {
                let ids = request
                    .accessions
                    .as_deref()
                    .filter(|ids| !ids.is_empty())
                    .ok_or_else(|| {
                        FetchError::Configuration(
                            "accession mode requires at least one run accession".to_string(),
                        )
                    })?;
                let tasks = resolve_explicit(ids, &request.output)?;
                Ok(Resolution {
                    tasks,
                    metadata: None,
                })
            }
            InputMode::Project => {
                let project = request.project.as_ref().ok_or_else(|| {
                    FetchError::Configuration("project mode requires a project id".to_string())
                })?;
                let table = self.metadata.project_metadata(project)?;
                let tasks = resolve_project(&table, project, &request.output)?;
                tracing::info!(project = %project, runs = tasks.len(), "resolved project runs");
                Ok(Resolution {
                    tasks,
                    metadata: Some(table),
                })
            }
        }
    }
}

pub fn resolve_explicit(
    ids: &[String],
    output: &Utf8PathBuf,
) -> Result<Vec<RetrievalTask>, FetchError> {
    ids.iter()
        .map(|id| {
            Ok(RetrievalTask {
                accession: id.parse()?,
                destination: output.clone(),
            })
        })
        .collect()
}

pub fn resolve_project(
    table: &MetadataTable,
    project: &ProjectId,
    output: &Utf8PathBuf,
) -> Result<Vec<RetrievalTask>, FetchError> {
    table.require_accession_columns()?;
    table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let (accession, experiment) = row_accessions(row, index)?;
            Ok(RetrievalTask {
                accession,
                destination: experiment_location(output, project, &experiment),
            })
        })
        .collect()
}

/// Parses the run and experiment accessions of the metadata row at `index`.
pub fn row_accessions(
    row: &MetadataRow,
    index: usize,
) -> Result<(RunAccession, ExperimentAccession), FetchError> {
    let run = row.get(RUN_ACCESSION_FIELD).unwrap_or_default();
    let experiment = row.get(EXPERIMENT_ACCESSION_FIELD).unwrap_or_default();
    if experiment.is_empty() {
        return Err(FetchError::Schema(format!(
            "metadata row {} has an empty experiment accession",
            index + 1
        )));
    }
    let accession: RunAccession = run.parse().map_err(|_| {
        FetchError::Schema(format!(
            "metadata row {} has an invalid run accession `{run}`",
            index + 1
        ))
    })?;
    let experiment: ExperimentAccession = experiment.parse().map_err(|_| {
        FetchError::Schema(format!(
            "metadata row {} has an invalid experiment accession `{experiment}`",
            index + 1
        ))
    })?;
    Ok((accession, experiment))
}
