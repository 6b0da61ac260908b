//! Conversion of warehouse result rows into portable JSON values.
//!
//! Rows arrive in the warehouse REST form: `{"f": [{"v": ...}, ...]}`, every
//! scalar encoded as a string, nested records as another `{"f": [...]}` and
//! repeated fields as `[{"v": ...}, ...]`.

use chrono::{DateTime, SecondsFormat};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value};

use crate::metadata::Column;

/// One converted row, fields in projection order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Convert one wire row against the result schema.
///
/// Cells missing from the row are reported as null.
pub fn convert_row(schema: &[Column], row: &Value) -> Record {
    let cells = cells(row);
    let fields = schema
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let raw = cells.get(i).and_then(|cell| cell.get("v")).unwrap_or(&Value::Null);
            (column.name.clone(), convert_value(column, raw))
        })
        .collect();
    Record { fields }
}

fn cells(row: &Value) -> &[Value] {
    row.get("f")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Convert one cell value, honoring the column's mode.
pub fn convert_value(column: &Column, raw: &Value) -> Value {
    if raw.is_null() {
        return if column.is_repeated() {
            Value::Array(Vec::new())
        } else {
            Value::Null
        };
    }

    if column.is_repeated() {
        let items = raw.as_array().map(Vec::as_slice).unwrap_or(&[]);
        return Value::Array(
            items
                .iter()
                .map(|item| convert_scalar(column, item.get("v").unwrap_or(item)))
                .collect(),
        );
    }

    convert_scalar(column, raw)
}

fn convert_scalar(column: &Column, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }

    if column.is_record() {
        let cells = cells(raw);
        let object: Map<String, Value> = column
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let value = cells.get(i).and_then(|c| c.get("v")).unwrap_or(&Value::Null);
                (field.name.clone(), convert_value(field, value))
            })
            .collect();
        return Value::Object(object);
    }

    let Some(text) = raw.as_str() else {
        // Already typed (some worker builds decode scalars themselves).
        return raw.clone();
    };

    match column.data_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "BOOLEAN" | "BOOL" => match text {
            "true" | "TRUE" => Value::Bool(true),
            "false" | "FALSE" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        "TIMESTAMP" => Value::String(timestamp_to_rfc3339(text).unwrap_or_else(|| text.to_string())),
        "JSON" => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        // NUMERIC, BIGNUMERIC, BYTES (base64), DATE, TIME, DATETIME, STRING, ...
        _ => Value::String(text.to_string()),
    }
}

/// Epoch seconds (`"1700000000.123456"` or `"1.700000000123456E9"`) to
/// RFC 3339 UTC. Non-numeric input is assumed to be formatted already.
fn timestamp_to_rfc3339(text: &str) -> Option<String> {
    let seconds: f64 = text.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    let ts = DateTime::from_timestamp_micros(micros)?;
    Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
