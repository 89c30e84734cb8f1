use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A table registered for periodic export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDefinition {
    pub id: i64,
    pub schema_name: String,
    pub table_name: String,
    /// Filename written by the previous export, used as the dispatch join key
    pub filename: Option<String>,
    pub is_active: bool,
    pub last_exported_at: Option<DateTime<Utc>>,
}

impl ExportDefinition {
    /// `schema.table`, used in logs and report entries.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// Rows returned by an export query.
///
/// Column order matches the query projection. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row<I, S>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(|c| c.map(Into::into)).collect());
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
