//! Comma-separated encoding of result sets.
//!
//! The first record is the header in projection order. Fields containing the
//! delimiter, a quote, CR or LF are quoted with doubled inner quotes. NULL is
//! written as an empty field, and an empty field decodes back to NULL.

use bytes::Bytes;
use common::model::ResultSet;
use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("failed to flush encoded rows: {0}")]
    Flush(String),
}

pub fn encode(result: &ResultSet) -> Result<Bytes, CodecError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b',')
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }

    let buffer = writer
        .into_inner()
        .map_err(|e| CodecError::Flush(e.error().to_string()))?;
    Ok(Bytes::from(buffer))
}

pub fn decode(content: &[u8]) -> Result<ResultSet, CodecError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .from_reader(content);

    let columns = reader.headers()?.iter().map(str::to_string).collect();
    let mut result = ResultSet::new(columns);
    for record in reader.records() {
        let record = record?;
        result.rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> ResultSet {
        ResultSet::new(vec!["id".into(), "customer".into(), "note".into()])
            .with_row([Some("1"), Some("Ada, Ltd"), None])
            .with_row([Some("2"), Some("Bob \"The Builder\""), Some("line1\nline2")])
            .with_row([Some("3"), Some("carriage\rreturn"), Some("plain")])
    }

    #[test]
    fn test_encode_quotes_only_when_needed() {
        let encoded = encode(&orders()).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,customer,note"));
        assert_eq!(lines.next(), Some("1,\"Ada, Ltd\","));
        assert!(text.contains("\"Bob \"\"The Builder\"\"\""));
        assert!(text.contains("\"line1\nline2\""));
    }

    #[test]
    fn test_round_trip_preserves_columns_and_values() {
        let original = orders();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_string_normalises_to_null() {
        let result = ResultSet::new(vec!["a".into(), "b".into()]).with_row([Some(""), Some("x")]);
        let decoded = decode(&encode(&result).unwrap()).unwrap();
        assert_eq!(decoded.rows[0], vec![None, Some("x".to_string())]);
    }

    #[test]
    fn test_empty_result_keeps_header() {
        let result = ResultSet::new(vec!["a".into(), "b".into()]);
        let encoded = encode(&result).unwrap();
        assert_eq!(&encoded[..], b"a,b\n");

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.columns, vec!["a", "b"]);
        assert_eq!(decoded.row_count(), 0);
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let result = ResultSet::new(vec!["a".into(), "b".into()]).with_row([Some("only one")]);
        assert!(encode(&result).is_err());
    }
}
