use chrono::{DateTime, Utc};
use common::model::ExportDefinition;
use once_cell::sync::Lazy;
use regex::Regex;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const EXTENSION: &str = ".csv";

static TIMESTAMP_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\d{8}_\d{6}$").expect("valid timestamp suffix pattern"));

/// Name of the artifact written for `definition` at `now`.
///
/// A previous filename keeps its stem: a trailing `.csv` and one trailing
/// `_YYYYMMDD_HHMMSS` are removed before the new timestamp is appended.
/// Without one the stem is `{schema}_{table}`.
pub fn derive_filename(definition: &ExportDefinition, now: DateTime<Utc>) -> String {
    let stem = match definition
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
    {
        Some(previous) => strip_timestamp(strip_extension(previous)).to_string(),
        None if definition.schema_name.trim().is_empty() => definition.table_name.clone(),
        None => format!("{}_{}", definition.schema_name, definition.table_name),
    };
    format!("{stem}_{}{EXTENSION}", now.format(TIMESTAMP_FORMAT))
}

fn strip_extension(name: &str) -> &str {
    name.strip_suffix(EXTENSION).unwrap_or(name)
}

fn strip_timestamp(stem: &str) -> &str {
    match TIMESTAMP_SUFFIX.find(stem) {
        Some(m) => &stem[..m.start()],
        None => stem,
    }
}
