//! Conversion of dynamically typed result rows into text cells.
//!
//! PostgreSQL columns of types without a native decoder are cast to `text` in
//! the query itself, so every column type exports in its canonical text form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use super::{CatalogError, quote_identifier};
use crate::model::ResultSet;

/// Return the first successful decode, rendered as text.
macro_rules! decode_as_text {
    ($row:expr, $idx:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Ok(value) = $row.try_get::<$ty, _>($idx) {
                return Ok(Some(value.to_string()));
            }
        )+
    };
}

/// PostgreSQL types decoded directly by [`postgres_cell`].
const POSTGRES_NATIVE_TYPES: &[&str] = &[
    "TEXT",
    "VARCHAR",
    "BPCHAR",
    "NAME",
    "INT8",
    "INT4",
    "INT2",
    "FLOAT8",
    "FLOAT4",
    "BOOL",
    "TIMESTAMP",
    "TIMESTAMPTZ",
    "DATE",
    "TIME",
    "UUID",
    "BYTEA",
];

pub(super) fn postgres_renders_natively(type_name: &str) -> bool {
    POSTGRES_NATIVE_TYPES.contains(&type_name)
}

/// `SELECT` over `table` that casts every non-native column to `text`, keeping
/// column names and order.
pub(super) fn postgres_text_projection(
    columns: &[(String, String)],
    table: &str,
) -> Result<String, CatalogError> {
    let projection = columns
        .iter()
        .map(|(name, type_name)| {
            let quoted = quote_identifier(name)?;
            Ok(if postgres_renders_natively(type_name) {
                quoted
            } else {
                format!("{quoted}::text AS {quoted}")
            })
        })
        .collect::<Result<Vec<_>, CatalogError>>()?;
    Ok(format!("SELECT {} FROM {table}", projection.join(", ")))
}

/// Whole floats keep a decimal point so `3.0` does not read back as an integer.
fn float_text<F: Into<f64> + ToString + Copy>(value: F) -> String {
    let wide: f64 = value.into();
    if wide.is_finite() && wide.fract() == 0.0 {
        format!("{wide:.1}")
    } else {
        value.to_string()
    }
}

pub(super) fn sqlite_result_set(
    columns: Vec<String>,
    rows: &[SqliteRow],
) -> Result<ResultSet, CatalogError> {
    let mut result = ResultSet::new(columns);
    for row in rows {
        let cells = (0..row.len())
            .map(|idx| sqlite_cell(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        result.rows.push(cells);
    }
    Ok(result)
}

pub(super) fn postgres_result_set(
    columns: Vec<String>,
    rows: &[PgRow],
) -> Result<ResultSet, CatalogError> {
    let mut result = ResultSet::new(columns);
    for row in rows {
        let cells = (0..row.len())
            .map(|idx| postgres_cell(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        result.rows.push(cells);
    }
    Ok(result)
}

fn sqlite_cell(row: &SqliteRow, idx: usize) -> Result<Option<String>, CatalogError> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(None);
    }

    decode_as_text!(row, idx, i64);
    if let Ok(value) = row.try_get::<f64, _>(idx) {
        return Ok(Some(float_text(value)));
    }
    decode_as_text!(row, idx, String, NaiveDateTime, NaiveDate);
    if let Ok(bytes) = row.try_get::<Vec<u8>, _>(idx) {
        return Ok(Some(hex::encode(bytes)));
    }

    // SQLite converts any storage class to text on request
    Ok(Some(row.try_get_unchecked::<String, _>(idx)?))
}

fn postgres_cell(row: &PgRow, idx: usize) -> Result<Option<String>, CatalogError> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(None);
        }
        raw.type_info().name().to_string()
    };

    decode_as_text!(row, idx, String, i64, i32, i16);
    if let Ok(value) = row.try_get::<f64, _>(idx) {
        return Ok(Some(float_text(value)));
    }
    if let Ok(value) = row.try_get::<f32, _>(idx) {
        return Ok(Some(float_text(value)));
    }
    decode_as_text!(row, idx, bool, NaiveDateTime, NaiveDate, NaiveTime, Uuid);
    if let Ok(value) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Ok(Some(value.to_rfc3339()));
    }
    if let Ok(bytes) = row.try_get::<Vec<u8>, _>(idx) {
        return Ok(Some(hex::encode(bytes)));
    }

    Err(CatalogError::UnsupportedType {
        column: row.column(idx).name().to_string(),
        type_name,
    })
}
