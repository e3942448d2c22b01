use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Location,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::String => write!(f, "string"),
            ColumnType::Location => write!(f, "location"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    String(String),
    Location(String),
}

impl FieldValue {
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::String(value) | FieldValue::Location(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHandle {
    pub id: String,
    pub project: String,
    pub name: String,
}

pub type RecordFields = BTreeMap<String, FieldValue>;

/// Changes staged against one table; a store applies them all or none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdate {
    columns: Vec<Column>,
    records: Vec<(String, RecordFields)>,
}

impl TableUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the column if the table lacks it; an existing column keeps its type.
    pub fn upsert_column(&mut self, name: impl Into<String>, kind: ColumnType) -> &mut Self {
        let name = name.into();
        if !self.columns.iter().any(|column| column.name == name) {
            self.columns.push(Column { name, kind });
        }
        self
    }

    /// Creates the record or overwrites the given fields of an existing one.
    pub fn upsert_record(&mut self, key: impl Into<String>, fields: RecordFields) -> &mut Self {
        self.records.push((key.into(), fields));
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn records(&self) -> &[(String, RecordFields)] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.records.is_empty()
    }
}

pub trait TableStore {
    fn get_table(&self, id: &str) -> Result<Option<TableHandle>, FetchError>;

    fn list_tables(&self, project: &str) -> Result<Vec<TableHandle>, FetchError>;

    /// Stores that cannot hand back the new table return `Ok(None)`; callers
    /// then look it up by name.
    fn create_table(&self, project: &str, name: &str) -> Result<Option<TableHandle>, FetchError>;

    /// Applies one update session. Nothing is durable unless this returns `Ok`.
    fn apply(&self, table: &TableHandle, update: TableUpdate) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_column_is_first_write_wins() {
        let mut update = TableUpdate::new();
        update
            .upsert_column("Downloaded", ColumnType::Location)
            .upsert_column("Downloaded", ColumnType::String)
            .upsert_column("library_layout", ColumnType::String);
        assert_eq!(update.columns().len(), 2);
        assert_eq!(update.columns()[0].kind, ColumnType::Location);
    }

    #[test]
    fn field_value_serializes_with_type_tag() {
        let value = FieldValue::Location("/out/SRP1/SRX1".to_string());
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"location","value":"/out/SRP1/SRX1"}"#);
    }
}
