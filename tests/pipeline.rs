use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use sra_fetch::app::App;
use sra_fetch::config::ResolvedConfig;
use sra_fetch::domain::{
    DOWNLOADED_COLUMN, InputMode, ProjectId, RetrievalOutcome, RunAccession, TableSelection,
};
use sra_fetch::error::FetchError;
use sra_fetch::executor::ExecutorSettings;
use sra_fetch::metadata::{MetadataClient, MetadataTable, parse_tsv};
use sra_fetch::output::JsonOutput;
use sra_fetch::registry::{ColumnType, FieldValue, TableStore, TableUpdate};
use sra_fetch::sra::{SraConverter, ToolSettings};
use sra_fetch::store::FileTableStore;
use sra_fetch::sync::{SkipReason, SyncStatus};

struct StaticMetadata(&'static str);

impl MetadataClient for StaticMetadata {
    fn project_metadata(&self, _project: &ProjectId) -> Result<MetadataTable, FetchError> {
        parse_tsv(self.0)
    }
}

/// Writes split FASTQ files like fasterq-dump would; fails for `fail`.
struct FakeConverter {
    fail: &'static str,
}

impl SraConverter for FakeConverter {
    fn convert(
        &self,
        accession: &RunAccession,
        destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, FetchError> {
        if accession.as_str() == self.fail {
            return Err(FetchError::Conversion(format!(
                "fasterq-dump exited with 3 for {accession}"
            )));
        }
        fs::create_dir_all(destination.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut files = Vec::new();
        for mate in 1..=2 {
            let path = destination.join(format!("{accession}_{mate}.fastq"));
            fs::write(path.as_std_path(), b"@r\nACGT\n+\nIIII\n")
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
            files.push(path);
        }
        Ok(files)
    }
}

const PROJECT_TSV: &str = "run_accession\texperiment_accession\textra_field\n\
                           SRR1\tSRX1\tx\n\
                           SRR2\tSRX2\ty\n";

fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn config(root: &Utf8Path, mode: InputMode, selection: TableSelection) -> ResolvedConfig {
    ResolvedConfig {
        mode,
        accessions: Some(vec!["SRR1".to_string(), "SRR2".to_string()]),
        project: Some("SRP396626".parse().unwrap()),
        output: root.join("fastq"),
        selection,
        executor: ExecutorSettings { workers: 2 },
        tools: ToolSettings::default(),
        metadata_fields: Vec::new(),
        registry: root.join("registry"),
    }
}

fn app(
    root: &Utf8Path,
    fail: &'static str,
) -> App<StaticMetadata, FakeConverter, FileTableStore> {
    App::new(
        StaticMetadata(PROJECT_TSV),
        FakeConverter { fail },
        FileTableStore::new(root.join("registry")),
    )
}

#[test]
fn explicit_runs_land_in_output_root_and_skip_registry() {
    let (_temp, root) = workspace();
    let app = app(&root, "SRR2");
    let config = config(&root, InputMode::Accessions, TableSelection::None);

    let report = app.run(&config, &JsonOutput).unwrap();

    let output = root.join("fastq");
    assert!(report.tasks.iter().all(|task| task.destination == output));
    assert_eq!(
        report.results.results()[0].outcome,
        RetrievalOutcome::Success {
            location: output.clone()
        }
    );
    assert!(matches!(
        report.results.results()[1].outcome,
        RetrievalOutcome::Failure { .. }
    ));
    assert!(output.join("SRR1_1.fastq").as_std_path().exists());
    assert_eq!(report.output, output);
    assert_eq!(
        report.sync.status,
        SyncStatus::Skipped {
            reason: SkipReason::ExplicitAccessions
        }
    );
    assert!(!app.store().registry_path().as_std_path().exists());
}

#[test]
fn project_run_records_intended_locations_even_for_failures() {
    let (_temp, root) = workspace();
    let app = app(&root, "SRR2");
    let table = app.store().create_table("lab", "existing").unwrap().unwrap();
    let config = config(
        &root,
        InputMode::Project,
        TableSelection::UseExisting {
            table_id: Some(table.id.clone()),
        },
    );

    let report = app.run(&config, &JsonOutput).unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(
        root.join("fastq/SRP396626/SRX1/SRR1_1.fastq")
            .as_std_path()
            .exists()
    );

    let store = app.store();
    let columns = store.columns(&table.id).unwrap();
    let names: Vec<&str> = columns.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["run_accession", "experiment_accession", "extra_field", DOWNLOADED_COLUMN]
    );
    assert_eq!(columns[2].kind, ColumnType::String);
    assert_eq!(columns[3].kind, ColumnType::Location);

    let first = store.record(&table.id, "SRR1").unwrap().unwrap();
    assert_eq!(first["extra_field"], FieldValue::String("x".to_string()));
    assert_eq!(
        first[DOWNLOADED_COLUMN],
        FieldValue::Location(root.join("fastq/SRP396626/SRX1").into_string())
    );
    let failed = store.record(&table.id, "SRR2").unwrap().unwrap();
    assert_eq!(
        failed[DOWNLOADED_COLUMN],
        FieldValue::Location(root.join("fastq/SRP396626/SRX2").into_string())
    );
}

#[test]
fn synchronizing_twice_leaves_the_same_table() {
    let (_temp, root) = workspace();
    let app = app(&root, "");
    let table = app.store().create_table("lab", "runs").unwrap().unwrap();
    let config = config(
        &root,
        InputMode::Project,
        TableSelection::UseExisting {
            table_id: Some(table.id),
        },
    );

    app.run(&config, &JsonOutput).unwrap();
    let once = fs::read_to_string(app.store().registry_path().as_std_path()).unwrap();
    app.run(&config, &JsonOutput).unwrap();
    let twice = fs::read_to_string(app.store().registry_path().as_std_path()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn unrelated_columns_survive_synchronization() {
    let (_temp, root) = workspace();
    let app = app(&root, "");
    let table = app.store().create_table("lab", "runs").unwrap().unwrap();
    let mut update = TableUpdate::new();
    update
        .upsert_column("curator_notes", ColumnType::String)
        .upsert_column("extra_field", ColumnType::Location);
    app.store().apply(&table, update).unwrap();

    let config = config(
        &root,
        InputMode::Project,
        TableSelection::UseExisting {
            table_id: Some(table.id.clone()),
        },
    );
    app.run(&config, &JsonOutput).unwrap();

    let columns = app.store().columns(&table.id).unwrap();
    assert_eq!(columns[0].name, "curator_notes");
    assert_eq!(columns[1].name, "extra_field");
    assert_eq!(columns[1].kind, ColumnType::Location);
    assert_eq!(columns.len(), 5);
}

#[test]
fn create_new_table_is_populated() {
    let (_temp, root) = workspace();
    let app = app(&root, "");
    let config = config(
        &root,
        InputMode::Project,
        TableSelection::CreateNew {
            project_id: Some("lab".to_string()),
            table_name: Some("SRP396626 runs".to_string()),
        },
    );

    let report = app.run(&config, &JsonOutput).unwrap();
    let SyncStatus::Synced { table, records, .. } = report.sync.status else {
        panic!("expected registry sync");
    };
    assert_eq!(table.name, "SRP396626 runs");
    assert_eq!(records, 2);
    assert_eq!(app.store().list_tables("lab").unwrap(), vec![table.clone()]);
    assert_eq!(app.store().record_count(&table.id).unwrap(), 2);
}

#[test]
fn missing_table_is_a_soft_skip() {
    let (_temp, root) = workspace();
    let app = app(&root, "");
    let config = config(
        &root,
        InputMode::Project,
        TableSelection::UseExisting {
            table_id: Some("42".to_string()),
        },
    );

    let report = app.run(&config, &JsonOutput).unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(
        report.sync.status,
        SyncStatus::Skipped {
            reason: SkipReason::TableNotFound {
                table_id: "42".to_string()
            }
        }
    );
}
