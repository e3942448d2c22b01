use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::RunAccession;
use crate::error::FetchError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub prefetch: Option<String>,
    pub fasterq_dump: Option<String>,
}

/// Per-invocation resource budget handed to the SRA Toolkit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    pub threads: u32,
    pub memory: String,
    pub prefetch: bool,
    pub max_size: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            threads: 8,
            memory: "10000MB".to_string(),
            prefetch: true,
            max_size: "10000GB".to_string(),
        }
    }
}

pub trait SraConverter: Send + Sync {
    fn convert(
        &self,
        accession: &RunAccession,
        destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, FetchError>;
}

#[derive(Debug, Clone)]
pub enum ToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SraToolkit {
    prefetch: Option<PathBuf>,
    fasterq_dump: Option<PathBuf>,
    settings: ToolSettings,
}

impl SraToolkit {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            prefetch: find_in_path("prefetch"),
            fasterq_dump: find_in_path("fasterq-dump"),
            settings,
        }
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn tool_status(&self) -> ToolStatus {
        if self.fasterq_dump.is_none() {
            return ToolStatus::Missing {
                message: "missing fasterq-dump (SRA Toolkit)".to_string(),
            };
        }
        if self.settings.prefetch && self.prefetch.is_none() {
            return ToolStatus::Missing {
                message: "missing prefetch (SRA Toolkit); disable prefetch to stream directly"
                    .to_string(),
            };
        }
        ToolStatus::Ready
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            prefetch: self
                .prefetch
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            fasterq_dump: self
                .fasterq_dump
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
        }
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), FetchError> {
        tracing::debug!(program = %program.display(), args = ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| FetchError::Conversion(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed ({}): {}", output.status, program.display())
        } else {
            stderr
        };
        Err(FetchError::Conversion(message))
    }

    fn prefetch(
        &self,
        accession: &RunAccession,
        out_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, FetchError> {
        let prefetch = self
            .prefetch
            .as_ref()
            .ok_or_else(|| FetchError::MissingTool("prefetch".to_string()))?;
        self.run_cmd(prefetch, &prefetch_args(accession, &self.settings, out_dir))?;
        find_archive(out_dir, accession).ok_or_else(|| {
            FetchError::Conversion(format!("prefetch did not produce an archive for {accession}"))
        })
    }
}

impl SraConverter for SraToolkit {
    fn convert(
        &self,
        accession: &RunAccession,
        destination: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, FetchError> {
        let fasterq = self
            .fasterq_dump
            .as_ref()
            .ok_or_else(|| FetchError::MissingTool("fasterq-dump".to_string()))?;
        fs::create_dir_all(destination.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;

        let archive = if self.settings.prefetch {
            Some(self.prefetch(accession, destination)?)
        } else {
            None
        };
        let target = archive
            .as_ref()
            .map(|path| path.to_string())
            .unwrap_or_else(|| accession.to_string());
        self.run_cmd(fasterq, &fasterq_dump_args(&target, &self.settings, destination))?;

        let fastq = find_fastq(destination, accession);
        if fastq.is_empty() {
            return Err(FetchError::Conversion(format!(
                "fasterq-dump produced no FASTQ files for {accession}"
            )));
        }

        // prefetch leaves <destination>/<accession>/<accession>.sra behind
        if let Some(parent) = archive.as_ref().and_then(|path| path.parent()) {
            if parent != destination {
                if let Err(err) = fs::remove_dir_all(parent.as_std_path()) {
                    tracing::warn!(path = %parent, error = %err, "failed to remove prefetched archive");
                }
            }
        }
        Ok(fastq)
    }
}

pub fn prefetch_args(
    accession: &RunAccession,
    settings: &ToolSettings,
    out_dir: &Utf8Path,
) -> Vec<String> {
    vec![
        accession.to_string(),
        "--max-size".to_string(),
        settings.max_size.clone(),
        "--output-directory".to_string(),
        out_dir.to_string(),
    ]
}

pub fn fasterq_dump_args(target: &str, settings: &ToolSettings, out_dir: &Utf8Path) -> Vec<String> {
    vec![
        target.to_string(),
        "--outdir".to_string(),
        out_dir.to_string(),
        "--split-files".to_string(),
        "--include-technical".to_string(),
        "--verbose".to_string(),
        "--mem".to_string(),
        settings.memory.clone(),
        "--threads".to_string(),
        settings.threads.to_string(),
    ]
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}

fn find_archive(root: &Utf8Path, accession: &RunAccession) -> Option<Utf8PathBuf> {
    let candidates = [
        format!("{accession}.sra"),
        format!("{accession}.sralite"),
    ];
    walk_files(root)
        .into_iter()
        .find(|path| {
            path.file_name()
                .map(|name| candidates.iter().any(|candidate| candidate == name))
                .unwrap_or(false)
        })
}

// Destinations may be shared between runs, so only this run's files count.
pub fn find_fastq(root: &Utf8Path, accession: &RunAccession) -> Vec<Utf8PathBuf> {
    let mut out: Vec<Utf8PathBuf> = walk_files(root)
        .into_iter()
        .filter(|path| {
            let name = path.file_name().unwrap_or_default();
            let stem_matches = name == format!("{accession}.fastq")
                || name.starts_with(&format!("{accession}_"));
            stem_matches
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("fastq"))
                    .unwrap_or(false)
        })
        .collect();
    out.sort();
    out
}

fn walk_files(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let Ok(entries) = fs::read_dir(path.as_std_path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
