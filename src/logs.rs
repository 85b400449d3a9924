use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::JsonKey;

/// Attribute value used when a label's path matches nothing in the payload
pub const NOT_FOUND: &str = "NOT FOUND";

/// Everything produced by one poll of one target. All entries share the resource attributes,
/// and a sink always receives a batch whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBatch {
    pub resource: BTreeMap<String, String>,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// When the entry was captured. Nothing in the payload is read for this.
    pub timestamp: DateTime<Utc>,
    pub severity_text: String,
    pub severity_number: SeverityNumber,
    pub attributes: BTreeMap<String, String>,
    pub body: LogValue,
}

/// Structural log body. JSON payloads are converted into this tree, text lines are a single
/// `Str`. There's no null - JSON nulls become the string "null" so the field isn't lost.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Seq(Vec<LogValue>),
    Map(BTreeMap<String, LogValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SeverityNumber {
    Trace = 1,
    Debug = 5,
    Info = 9,
    Warn = 13,
    Error = 17,
    Fatal = 21,
}

/// Map a configured level onto a severity. Case-insensitive, and anything unrecognised
/// (including the empty string) is Info.
pub fn severity_number(level: &str) -> SeverityNumber {
    match level.to_ascii_lowercase().as_str() {
        "trace" => SeverityNumber::Trace,
        "debug" => SeverityNumber::Debug,
        "info" => SeverityNumber::Info,
        "warn" | "warning" => SeverityNumber::Warn,
        "error" => SeverityNumber::Error,
        "fatal" => SeverityNumber::Fatal,
        _ => SeverityNumber::Info,
    }
}

impl SeverityNumber {
    pub fn number(self) -> i32 {
        self as i32
    }
}

impl LogBatch {
    pub fn new(resource: BTreeMap<String, String>) -> Self {
        LogBatch {
            resource,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resource_attr(&self, key: &str) -> Option<&str> {
        self.resource.get(key).map(|s| s.as_str())
    }
}

impl LogEntry {
    /// A new entry stamped with the current time, with severity derived from `level`
    pub fn new(level: &str, body: LogValue) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            severity_text: level.to_uppercase(),
            severity_number: severity_number(level),
            attributes: BTreeMap::new(),
            body,
        }
    }
}

impl From<&Value> for LogValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => LogValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), LogValue::from(v)))
                    .collect(),
            ),
            Value::Array(items) => LogValue::Seq(items.iter().map(LogValue::from).collect()),
            Value::String(s) => LogValue::Str(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => LogValue::Int(i),
                None => LogValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::Bool(b) => LogValue::Bool(*b),
            Value::Null => LogValue::Str("null".to_string()),
        }
    }
}

impl LogValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LogValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[LogValue]> {
        match self {
            LogValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, LogValue>> {
        match self {
            LogValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Render an extracted value as an attribute string. Strings are used as-is, everything
/// else is written out as JSON, so an aggregated array reads `["a","b"]`.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How a log entry is written out by the writers in the binary
#[derive(Clone)]
pub enum LogFormat {
    Text { sep: String, keys: Vec<JsonKey> },
    Structured,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::text(
            " | ".to_string(),
            vec![
                JsonKey::from("timestamp"),
                JsonKey::from("severity_text"),
                JsonKey::from("body"),
            ],
        )
    }
}

impl LogFormat {
    pub fn text(sep: String, keys: Vec<JsonKey>) -> Self {
        LogFormat::Text { sep, keys }
    }

    /// Format one entry as a single line. Keys are looked up in the JSON form of the entry,
    /// with the batch's resource attributes available under `resource`.
    pub fn format(&self, batch: &LogBatch, entry: &LogEntry) -> Result<String, serde_json::Error> {
        let mut event = serde_json::to_value(entry)?;
        if let Value::Object(map) = &mut event {
            map.insert("resource".to_string(), serde_json::to_value(&batch.resource)?);
        }
        Ok(match self {
            LogFormat::Text { sep, keys } => Self::format_text(sep, keys, &event),
            LogFormat::Structured => event.to_string(),
        })
    }

    fn format_text(sep: &str, keys: &[JsonKey], event: &Value) -> String {
        keys.iter()
            .map(|key| match key.get(event) {
                Some(value) => render_value(&value),
                None => "KEY_NOT_FOUND".to_string(),
            })
            .collect::<Vec<_>>()
            .join(sep)
    }
}
