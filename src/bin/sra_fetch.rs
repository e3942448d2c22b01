use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sra_fetch::app::{App, RunReport};
use sra_fetch::config::{ConfigLoader, Overrides};
use sra_fetch::domain::{InputMode, ProjectId, RetrievalOutcome};
use sra_fetch::error::FetchError;
use sra_fetch::metadata::{EnaMetadataClient, default_metadata_fields};
use sra_fetch::output::{JsonOutput, LogSink, OutputMode};
use sra_fetch::sra::{SraToolkit, ToolSettings, ToolStatus};
use sra_fetch::store::FileTableStore;
use sra_fetch::sync::SyncStatus;

const PARTIAL_FAILURE_EXIT: u8 = 4;

#[derive(Parser)]
#[command(name = "sra-fetch")]
#[command(about = "Download SRA runs as FASTQ and mirror their metadata into a registry table")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Retrieve runs and synchronize the registry")]
    Run(RunArgs),
    #[command(about = "Print run metadata for a project")]
    Metadata(MetadataArgs),
    #[command(about = "List registry tables in a project")]
    Tables(TablesArgs),
    #[command(about = "Show SRA Toolkit status")]
    Tools,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<InputMode>,

    #[arg(long = "accession", short = 'a')]
    accessions: Vec<String>,

    #[arg(long, short = 'p')]
    project: Option<String>,

    #[arg(long, short = 'o')]
    output: Option<Utf8PathBuf>,

    #[arg(long = "table")]
    table_id: Option<String>,

    #[arg(long)]
    create_table: Option<String>,

    #[arg(long)]
    table_project: Option<String>,

    #[arg(long)]
    no_table: bool,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    threads: Option<u32>,

    #[arg(long)]
    memory: Option<String>,

    #[arg(long)]
    no_prefetch: bool,

    #[arg(long)]
    registry: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct MetadataArgs {
    project: String,
}

#[derive(Args)]
struct TablesArgs {
    project: String,

    #[arg(long)]
    registry: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<FetchError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::Configuration(_)
        | FetchError::InvalidRunAccession(_)
        | FetchError::InvalidExperimentAccession(_)
        | FetchError::InvalidProjectId(_)
        | FetchError::ConfigRead(_)
        | FetchError::ConfigParse(_)
        | FetchError::Schema(_) => 2,
        FetchError::MetadataHttp(_)
        | FetchError::MetadataStatus { .. }
        | FetchError::MissingTool(_)
        | FetchError::Conversion(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Metadata(args) => run_metadata(args, output_mode).map(|_| ExitCode::SUCCESS),
        Commands::Tables(args) => run_tables(args, output_mode).map(|_| ExitCode::SUCCESS),
        Commands::Tools => run_tools(output_mode).map(|_| ExitCode::SUCCESS),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let overrides = Overrides {
        mode: args.mode,
        accessions: args.accessions,
        project: args.project,
        output: args.output,
        table_id: args.table_id,
        create_table: args.create_table,
        table_project: args.table_project,
        no_table: args.no_table,
        workers: args.workers,
        threads: args.threads,
        memory: args.memory,
        no_prefetch: args.no_prefetch,
        registry: args.registry,
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), overrides)?;

    let toolkit = SraToolkit::new(config.tools.clone());
    if let ToolStatus::Missing { message } = toolkit.tool_status() {
        return Err(FetchError::MissingTool(message).into());
    }
    let metadata = EnaMetadataClient::new(config.metadata_fields.clone())?;
    let store = FileTableStore::new(config.registry.clone());
    let app = App::new(metadata, toolkit, store);

    let report = match output_mode {
        OutputMode::Json => {
            let report = app.run(&config, &JsonOutput)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
            report
        }
        OutputMode::Human => {
            let report = app.run(&config, &LogSink)?;
            print_run_summary(&report);
            report
        }
    };

    if report.failed > 0 {
        return Ok(ExitCode::from(PARTIAL_FAILURE_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_metadata(args: MetadataArgs, output_mode: OutputMode) -> miette::Result<()> {
    let project: ProjectId = args.project.parse()?;
    let config = ConfigLoader::load(None)?;
    let fields = config.metadata_fields.unwrap_or_else(default_metadata_fields);
    let client = EnaMetadataClient::new(fields)?;
    let app = App::new(
        client,
        SraToolkit::new(ToolSettings::default()),
        FileTableStore::new(Utf8PathBuf::new()),
    );
    let table = match output_mode {
        OutputMode::Json => app.metadata(&project, &JsonOutput)?,
        OutputMode::Human => app.metadata(&project, &LogSink)?,
    };
    JsonOutput::print_metadata(&table).into_diagnostic()
}

fn run_tables(args: TablesArgs, output_mode: OutputMode) -> miette::Result<()> {
    let root = match args.registry {
        Some(root) => root,
        None => FileTableStore::default_root()?,
    };
    let store = FileTableStore::new(root);
    let app = App::new(
        EnaMetadataClient::new(Vec::new())?,
        SraToolkit::new(ToolSettings::default()),
        store,
    );
    let result = app.tables(&args.project)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_tables(&result).into_diagnostic(),
        OutputMode::Human => {
            if result.tables.is_empty() {
                println!("no tables in project {}", result.project);
            }
            for table in &result.tables {
                println!("{}\t{}", table.id, table.name);
            }
            Ok(())
        }
    }
}

fn run_tools(output_mode: OutputMode) -> miette::Result<()> {
    let toolkit = SraToolkit::new(ToolSettings::default());
    let info = toolkit.tool_info();
    match output_mode {
        OutputMode::Json => JsonOutput::print_tools(&info).into_diagnostic(),
        OutputMode::Human => {
            match toolkit.tool_status() {
                ToolStatus::Ready => println!("SRA Toolkit ready"),
                ToolStatus::Missing { message } => println!("SRA Toolkit not ready: {message}"),
            }
            println!(
                "prefetch: {}",
                info.prefetch.as_deref().unwrap_or("not found")
            );
            println!(
                "fasterq-dump: {}",
                info.fasterq_dump.as_deref().unwrap_or("not found")
            );
            Ok(())
        }
    }
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}SRA fetch summary{reset}");
    println!("{green}Converted runs: {}{reset}", report.succeeded);
    if report.failed > 0 {
        println!("{red}Failed runs: {}{reset}", report.failed);
    }

    for result in report.results.results() {
        match &result.outcome {
            RetrievalOutcome::Success { location } => {
                println!("{green}  ok   {} -> {location}{reset}", result.accession);
            }
            RetrievalOutcome::Failure { reason } => {
                println!("{red}  fail {}: {reason}{reset}", result.accession);
            }
        }
    }

    match &report.sync.status {
        SyncStatus::Synced {
            table,
            schema_columns,
            records,
        } => println!(
            "{cyan}Registry table {} ({}): {schema_columns} column(s), {records} record(s){reset}",
            table.id, table.name
        ),
        SyncStatus::Skipped { reason } => {
            println!("{yellow}Registry sync skipped: {reason}{reset}")
        }
    }
    println!("Output: {}", report.output);
}
