use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const RUN_ACCESSION_FIELD: &str = "run_accession";
pub const EXPERIMENT_ACCESSION_FIELD: &str = "experiment_accession";
pub const DOWNLOADED_COLUMN: &str = "Downloaded";

static RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[SED]RR\d+$").unwrap());
static EXPERIMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[SED]RX\d+$").unwrap());
static PROJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([SED]RP\d+|PRJ(NA|EB|DB)\d+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !RUN_RE.is_match(&normalized) {
            return Err(FetchError::InvalidRunAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Experiment accession; doubles as a directory name under the project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentAccession(String);

impl ExperimentAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentAccession {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !EXPERIMENT_RE.is_match(&normalized) {
            return Err(FetchError::InvalidExperimentAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !PROJECT_RE.is_match(&normalized) {
            return Err(FetchError::InvalidProjectId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Accessions,
    Project,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Accessions => write!(f, "accessions"),
            InputMode::Project => write!(f, "project"),
        }
    }
}

/// Which registry table, if any, receives the run metadata.
///
/// Fields are optional because each policy is only acted upon when its
/// parameters are complete; an incomplete selection skips synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableSelection {
    UseExisting {
        table_id: Option<String>,
    },
    CreateNew {
        project_id: Option<String>,
        table_name: Option<String>,
    },
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalTask {
    pub accession: RunAccession,
    pub destination: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RetrievalOutcome {
    Success { location: Utf8PathBuf },
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalResult {
    pub accession: RunAccession,
    #[serde(flatten)]
    pub outcome: RetrievalOutcome,
}

impl RetrievalResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RetrievalOutcome::Success { .. })
    }
}

/// Destination of every run belonging to one experiment of a project.
pub fn experiment_location(
    root: &Utf8Path,
    project: &ProjectId,
    experiment: &ExperimentAccession,
) -> Utf8PathBuf {
    root.join(project.as_str()).join(experiment.as_str())
}
