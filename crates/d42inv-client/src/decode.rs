//! Decoding of query and listing responses into flat records

use d42inv_core::FlatRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Response format requested from the DOQL endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoqlFormat {
    /// CSV with a header row
    #[default]
    Csv,
    /// JSON array of objects
    Json,
}

/// Parse CSV text with a header row
///
/// Values are trimmed; short rows simply lack the trailing fields.
///
/// # Errors
/// Returns `Csv` if the text is not valid CSV.
pub fn parse_csv(text: &str) -> Result<Vec<FlatRecord>> {
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(field, value)| (field, Some(value.to_string())))
                .collect(),
        );
    }
    Ok(rows)
}

/// Parse a JSON body: a top-level array, or an object holding one
///
/// With `items_key` the array is taken from that member; without it the
/// first array-valued member is used.
///
/// # Errors
/// Returns `Json` for invalid JSON and `InvalidResponse` when no array of
/// objects can be found.
pub fn parse_json(text: &str, items_key: Option<&str>) -> Result<Vec<FlatRecord>> {
    let value: Value = serde_json::from_str(text)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match items_key {
            Some(key) => map
                .get(key)
                .and_then(Value::as_array)
                .ok_or_else(|| ClientError::InvalidResponse(format!("missing array {key:?}")))?,
            None => map
                .values()
                .find_map(Value::as_array)
                .ok_or_else(|| ClientError::InvalidResponse("no array in response".to_string()))?,
        },
        _ => {
            return Err(ClientError::InvalidResponse(
                "expected an array or an object".to_string(),
            ));
        }
    };
    items_to_records(items)
}

/// Flatten an array of JSON objects
///
/// # Errors
/// Returns `InvalidResponse` if an item is not an object.
pub fn items_to_records(items: &[Value]) -> Result<Vec<FlatRecord>> {
    items
        .iter()
        .map(|item| {
            item.as_object()
                .map(flatten_object)
                .ok_or_else(|| ClientError::InvalidResponse(format!("expected object, got {item}")))
        })
        .collect()
}

/// Flatten one JSON object into a flat record
///
/// Strings pass through, numbers and booleans are rendered, arrays of
/// scalars are comma-joined, and nested objects are kept as JSON text.
#[must_use]
pub fn flatten_object(object: &Map<String, Value>) -> FlatRecord {
    object
        .iter()
        .map(|(key, value)| (key.as_str(), scalar(value)))
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => Some(
            items
                .iter()
                .filter_map(scalar)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
