use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("configuration error: {0}")]
    #[diagnostic(help("pass --accession for explicit runs or --project for a whole project"))]
    Configuration(String),

    #[error("invalid run accession: {0}")]
    InvalidRunAccession(String),

    #[error("invalid experiment accession: {0}")]
    InvalidExperimentAccession(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("metadata schema error: {0}")]
    Schema(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("metadata request failed: {0}")]
    MetadataHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("sra conversion failed: {0}")]
    Conversion(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("completion barrier broken: {0}")]
    Barrier(String),
}
