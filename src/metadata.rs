use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::domain::{EXPERIMENT_ACCESSION_FIELD, ProjectId, RUN_ACCESSION_FIELD};
use crate::error::FetchError;

pub const ENA_FILEREPORT_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/filereport";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataRow {
    columns: Vec<(String, String)>,
}

impl MetadataRow {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataTable {
    pub columns: Vec<String>,
    pub rows: Vec<MetadataRow>,
}

impl MetadataTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|name| name == column)
    }

    pub fn require_accession_columns(&self) -> Result<(), FetchError> {
        for required in [RUN_ACCESSION_FIELD, EXPERIMENT_ACCESSION_FIELD] {
            if !self.has_column(required) {
                return Err(FetchError::Schema(format!(
                    "metadata result is missing the `{required}` column"
                )));
            }
        }
        Ok(())
    }
}

pub trait MetadataClient: Send + Sync {
    fn project_metadata(&self, project: &ProjectId) -> Result<MetadataTable, FetchError>;
}

#[derive(Clone)]
pub struct EnaMetadataClient {
    client: Client,
    base_url: String,
    fields: Vec<String>,
}

impl EnaMetadataClient {
    pub fn new(fields: Vec<String>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::MetadataHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| FetchError::MetadataHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: ENA_FILEREPORT_URL.to_string(),
            fields,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, FetchError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying metadata request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying metadata request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::MetadataHttp(err.to_string()));
                }
            }
        }
    }
}

impl MetadataClient for EnaMetadataClient {
    fn project_metadata(&self, project: &ProjectId) -> Result<MetadataTable, FetchError> {
        let fields = request_fields(&self.fields);
        tracing::info!(project = %project, "querying run metadata");
        let response = self.send_with_retries(|| {
            self.client.get(&self.base_url).query(&[
                ("accession", project.as_str()),
                ("result", "read_run"),
                ("fields", fields.as_str()),
                ("format", "tsv"),
            ])
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "metadata request failed".to_string());
            return Err(FetchError::MetadataStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| FetchError::MetadataHttp(err.to_string()))?;
        parse_tsv(&body)
    }
}

pub fn default_metadata_fields() -> Vec<String> {
    [
        "run_accession",
        "experiment_accession",
        "study_accession",
        "sample_accession",
        "secondary_sample_accession",
        "experiment_title",
        "sample_alias",
        "scientific_name",
        "tax_id",
        "instrument_platform",
        "instrument_model",
        "library_layout",
        "library_strategy",
        "library_source",
        "library_selection",
        "read_count",
        "base_count",
    ]
    .iter()
    .map(|field| field.to_string())
    .collect()
}

// The accession columns are always requested so the schema check can pass.
fn request_fields(fields: &[String]) -> String {
    let mut out: Vec<&str> = vec![RUN_ACCESSION_FIELD, EXPERIMENT_ACCESSION_FIELD];
    for field in fields {
        if !out.contains(&field.as_str()) {
            out.push(field.as_str());
        }
    }
    out.join(",")
}

pub fn parse_tsv(body: &str) -> Result<MetadataTable, FetchError> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(MetadataTable::default());
    };
    let columns: Vec<String> = header
        .split('\t')
        .map(|name| name.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        let values: Vec<&str> = line.split('\t').collect();
        if values.len() > columns.len() {
            return Err(FetchError::Schema(format!(
                "metadata row {} has {} fields, header has {}",
                index + 1,
                values.len(),
                columns.len()
            )));
        }
        let row = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let value = values.get(idx).map(|value| value.trim()).unwrap_or("");
                (name.clone(), value.to_string())
            })
            .collect();
        rows.push(MetadataRow::new(row));
    }
    Ok(MetadataTable { columns, rows })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_tsv_keeps_column_and_row_order() {
        let body = "run_accession\texperiment_accession\tlibrary_layout\n\
                    SRR2\tSRX2\tPAIRED\n\
                    SRR1\tSRX1\tSINGLE\n";
        let table = parse_tsv(body).unwrap();
        assert_eq!(
            table.columns,
            vec!["run_accession", "experiment_accession", "library_layout"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("run_accession"), Some("SRR2"));
        assert_eq!(table.rows[1].get("library_layout"), Some("SINGLE"));
    }

    #[test]
    fn parse_tsv_pads_short_rows() {
        let table = parse_tsv("run_accession\texperiment_accession\tsample_alias\nSRR1\tSRX1\n")
            .unwrap();
        assert_eq!(table.rows[0].get("sample_alias"), Some(""));
    }

    #[test]
    fn parse_tsv_rejects_overlong_rows() {
        let err = parse_tsv("run_accession\nSRR1\textra\n").unwrap_err();
        assert_matches!(err, FetchError::Schema(_));
    }

    #[test]
    fn empty_body_yields_empty_table() {
        let table = parse_tsv("").unwrap();
        assert!(table.columns.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn request_fields_always_lead_with_accessions() {
        let fields = vec!["read_count".to_string(), "run_accession".to_string()];
        assert_eq!(
            request_fields(&fields),
            "run_accession,experiment_accession,read_count"
        );
    }

    #[test]
    fn missing_experiment_column_is_schema_error() {
        let table = parse_tsv("run_accession\nSRR1\n").unwrap();
        assert_matches!(
            table.require_accession_columns(),
            Err(FetchError::Schema(message)) if message.contains("experiment_accession")
        );
    }
}
