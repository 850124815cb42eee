//! CSV ingestion with encoding autodetection and structure inference
//!
//! Supports UTF-8 (with or without BOM), GBK/GB2312/GB18030, Big5, and
//! Latin-1/CP1252 input. Decoding tries UTF-8 strictly first, then the
//! multi-byte Chinese encodings, and falls back to Windows-1252, which
//! accepts any byte sequence. A header row is required, at least one data
//! row must exist, and every row gets a synthetic `_row_index` column
//! starting at 1.

use crate::error::{BatchError, Result};
use encoding_rs::{BIG5, GB18030, UTF_8, WINDOWS_1252};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// One CSV row as a JSON object, including the synthetic `_row_index`
pub type Row = Map<String, Value>;

/// Inferred column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Datetime,
    Text,
}

/// Structure summary embedded into the instruction-generation prompt
#[derive(Debug, Clone, Serialize)]
pub struct CsvStructure {
    pub columns: Vec<String>,
    pub column_types: HashMap<String, ColumnType>,
    /// Up to the first five rows
    pub sample: Vec<Value>,
    pub row_count: usize,
    pub encoding: String,
}

impl CsvStructure {
    /// Compact rendering for prompts
    pub fn describe(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|name| {
                let kind = match self.column_types.get(name) {
                    Some(ColumnType::Numeric) => "numeric",
                    Some(ColumnType::Datetime) => "datetime",
                    _ => "text",
                };
                format!("{} ({})", name, kind)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sample = self
            .sample
            .iter()
            .map(|row| row.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Columns: {}\nRows: {}\nSample:\n{}",
            columns, self.row_count, sample
        )
    }
}

/// Parse and validate a CSV file, returning its rows and structure summary
pub fn load_csv(path: &Path) -> Result<(Vec<Row>, CsvStructure)> {
    let bytes = std::fs::read(path)
        .map_err(|e| BatchError::Csv(format!("cannot read {}: {}", path.display(), e)))?;
    let (text, encoding) = decode(&bytes)?;
    parse_csv(&text, encoding)
}

/// Decode raw bytes, trying strict UTF-8, then GB18030 and Big5, then
/// falling back to Windows-1252.
fn decode(bytes: &[u8]) -> Result<(String, String)> {
    // Encoding::decode strips a UTF-8 BOM when present
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return Ok((text.into_owned(), "utf-8".to_string()));
    }

    for encoding in [GB18030, BIG5] {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            debug!(encoding = encoding.name(), "Decoded CSV with non-UTF-8 encoding");
            return Ok((text.into_owned(), encoding.name().to_lowercase()));
        }
    }

    let (text, _, _) = WINDOWS_1252.decode(bytes);
    Ok((text.into_owned(), "windows-1252".to_string()))
}

fn parse_csv(text: &str, encoding: String) -> Result<(Vec<Row>, CsvStructure)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| BatchError::Csv(format!("header row unreadable: {}", e)))?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|name| name.is_empty()) {
        return Err(BatchError::Csv("header row is required".to_string()));
    }

    let mut rows: Vec<Row> = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| BatchError::Csv(format!("row {}: {}", index + 1, e)))?;

        let mut row = Map::new();
        for (column, value) in headers.iter().zip(record.iter()) {
            row.insert(column.clone(), Value::String(value.to_string()));
        }
        row.insert("_row_index".to_string(), json!(index + 1));
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(BatchError::Csv("CSV has no data rows".to_string()));
    }

    let column_types = infer_column_types(&headers, &rows);
    let sample = rows.iter().take(5).map(|row| Value::Object(row.clone())).collect();

    let structure = CsvStructure {
        columns: headers,
        column_types,
        sample,
        row_count: rows.len(),
        encoding,
    };

    Ok((rows, structure))
}

fn infer_column_types(columns: &[String], rows: &[Row]) -> HashMap<String, ColumnType> {
    const DATE_HINTS: [&str; 6] = ["date", "time", "day", "created", "updated", "timestamp"];

    let mut types = HashMap::new();
    for column in columns {
        let lower = column.to_lowercase();
        let kind = if DATE_HINTS.iter().any(|hint| lower.contains(hint)) {
            ColumnType::Datetime
        } else {
            // Numeric if the first non-empty value parses as a number
            let first_value = rows.iter().find_map(|row| {
                row.get(column)
                    .and_then(Value::as_str)
                    .filter(|value| !value.trim().is_empty())
            });
            match first_value {
                Some(value) if value.trim().parse::<f64>().is_ok() => ColumnType::Numeric,
                _ => ColumnType::Text,
            }
        };
        types.insert(column.clone(), kind);
    }
    types
}
