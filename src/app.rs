use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::barrier::{self, CompletedBatch};
use crate::config::ResolvedConfig;
use crate::domain::{InputMode, ProjectId, RetrievalTask};
use crate::error::FetchError;
use crate::executor::Executor;
use crate::metadata::{MetadataClient, MetadataTable};
use crate::registry::{TableHandle, TableStore};
use crate::resolver::{ResolveRequest, Resolver};
use crate::sra::SraConverter;
use crate::sync::{SyncReport, SyncRequest, Synchronizer};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub mode: InputMode,
    pub project: Option<ProjectId>,
    pub output: Utf8PathBuf,
    pub tasks: Vec<RetrievalTask>,
    pub succeeded: usize,
    pub failed: usize,
    pub results: CompletedBatch,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablesResult {
    pub project: String,
    pub tables: Vec<TableHandle>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<M: MetadataClient, C: SraConverter + 'static, S: TableStore> {
    metadata: M,
    converter: Arc<C>,
    store: S,
}

impl<M: MetadataClient, C: SraConverter + 'static, S: TableStore> App<M, C, S> {
    pub fn new(metadata: M, converter: C, store: S) -> Self {
        Self {
            metadata,
            converter: Arc::new(converter),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, FetchError> {
        let started_at = iso_timestamp();

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; mode={}", config.mode),
            elapsed: None,
        });
        let request = ResolveRequest {
            mode: config.mode,
            accessions: config.accessions.clone(),
            project: config.project.clone(),
            output: config.output.clone(),
        };
        let resolution = Resolver::new(&self.metadata).resolve(&request)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Retrieve; {} run(s) on {} worker(s)",
                resolution.tasks.len(),
                config.executor.workers
            ),
            elapsed: None,
        });
        let start = Instant::now();
        let executor = Executor::from_arc(Arc::clone(&self.converter), config.executor);
        let pending = executor.dispatch(&resolution.tasks)?;
        let completed = barrier::join(pending)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Barrier; {} succeeded, {} failed",
                completed.succeeded(),
                completed.failed()
            ),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: "phase=Sync; updating registry".to_string(),
            elapsed: None,
        });
        let sync_request = SyncRequest {
            mode: config.mode,
            project: config.project.clone(),
            selection: config.selection.clone(),
            output: config.output.clone(),
        };
        let sync = Synchronizer::new(&self.store).sync(
            &sync_request,
            resolution.metadata.as_ref(),
            &completed,
        )?;

        Ok(RunReport {
            started_at,
            finished_at: iso_timestamp(),
            mode: config.mode,
            project: config.project.clone(),
            output: sync.output.clone(),
            tasks: resolution.tasks,
            succeeded: completed.succeeded(),
            failed: completed.failed(),
            results: completed,
            sync,
        })
    }

    pub fn metadata(
        &self,
        project: &ProjectId,
        sink: &dyn ProgressSink,
    ) -> Result<MetadataTable, FetchError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; querying {project}"),
            elapsed: None,
        });
        let start = Instant::now();
        let table = self.metadata.project_metadata(project)?;
        sink.event(ProgressEvent {
            message: format!("metadata.response rows={}", table.rows.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(table)
    }

    pub fn tables(&self, project: &str) -> Result<TablesResult, FetchError> {
        Ok(TablesResult {
            project: project.to_string(),
            tables: self.store.list_tables(project)?,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camino::Utf8Path;

    use super::*;
    use crate::domain::{RunAccession, TableSelection};
    use crate::executor::ExecutorSettings;
    use crate::metadata::parse_tsv;
    use crate::output::JsonOutput;
    use crate::registry::TableUpdate;
    use crate::sra::ToolSettings;
    use crate::sync::{SkipReason, SyncStatus};

    struct MockMetadata;

    impl MetadataClient for MockMetadata {
        fn project_metadata(&self, _project: &ProjectId) -> Result<MetadataTable, FetchError> {
            parse_tsv("run_accession\texperiment_accession\nSRR1\tSRX1\n")
        }
    }

    struct MockConverter;

    impl SraConverter for MockConverter {
        fn convert(
            &self,
            accession: &RunAccession,
            _destination: &Utf8Path,
        ) -> Result<Vec<Utf8PathBuf>, FetchError> {
            if accession.as_str() == "SRR2" {
                return Err(FetchError::Conversion("exit status: 1".to_string()));
            }
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MockStore {
        applied: Mutex<usize>,
    }

    impl TableStore for MockStore {
        fn get_table(&self, id: &str) -> Result<Option<TableHandle>, FetchError> {
            Ok(Some(TableHandle {
                id: id.to_string(),
                project: "lab".to_string(),
                name: "runs".to_string(),
            }))
        }

        fn list_tables(&self, _project: &str) -> Result<Vec<TableHandle>, FetchError> {
            Ok(Vec::new())
        }

        fn create_table(
            &self,
            _project: &str,
            _name: &str,
        ) -> Result<Option<TableHandle>, FetchError> {
            Ok(None)
        }

        fn apply(&self, _table: &TableHandle, _update: TableUpdate) -> Result<(), FetchError> {
            *self.applied.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn config(mode: InputMode, selection: TableSelection) -> ResolvedConfig {
        ResolvedConfig {
            mode,
            accessions: Some(vec!["SRR1".to_string(), "SRR2".to_string()]),
            project: Some("SRP1".parse().unwrap()),
            output: Utf8PathBuf::from("R"),
            selection,
            executor: ExecutorSettings { workers: 2 },
            tools: ToolSettings::default(),
            metadata_fields: Vec::new(),
            registry: Utf8PathBuf::from("/registry"),
        }
    }

    #[test]
    fn explicit_run_with_failure_still_completes() {
        let app = App::new(
            MockMetadata,
            MockConverter,
            MockStore::default(),
        );
        let report = app
            .run(&config(InputMode::Accessions, TableSelection::None), &JsonOutput)
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.results.results()[0].is_success());
        assert!(!report.results.results()[1].is_success());
        assert_eq!(report.output, "R");
        assert_eq!(
            report.sync.status,
            SyncStatus::Skipped {
                reason: SkipReason::ExplicitAccessions
            }
        );
        assert_eq!(*app.store().applied.lock().unwrap(), 0);
    }

    #[test]
    fn project_run_syncs_existing_table() {
        let app = App::new(
            MockMetadata,
            MockConverter,
            MockStore::default(),
        );
        let report = app
            .run(
                &config(
                    InputMode::Project,
                    TableSelection::UseExisting {
                        table_id: Some("T".to_string()),
                    },
                ),
                &JsonOutput,
            )
            .unwrap();

        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].destination, "R/SRP1/SRX1");
        assert!(matches!(report.sync.status, SyncStatus::Synced { records: 1, .. }));
        // one schema session plus one session per row
        assert_eq!(*app.store().applied.lock().unwrap(), 2);
    }

    #[test]
    fn worker_count_comes_from_the_run_config() {
        let app = App::new(MockMetadata, MockConverter, MockStore::default());
        let mut config = config(InputMode::Accessions, TableSelection::None);
        config.executor = ExecutorSettings { workers: 0 };
        let err = app.run(&config, &JsonOutput).unwrap_err();
        assert!(matches!(err, FetchError::Configuration(_)));
    }
}
