use serde_json::Value;

pub mod config;
pub mod error;
pub mod logs;
pub mod parser;
pub mod poller;
pub mod request;
pub mod scheduler;
pub mod sink;

pub use config::{CollectorConfig, TargetSpec};
pub use error::{ConfigError, PollError, SchedulerError};
pub use logs::{LogBatch, LogEntry, LogValue, SeverityNumber};
pub use scheduler::{PollOutcome, Scheduler, SchedulerState};
pub use sink::Sink;

// Kinda json-pointer, but not really - walking into an array applies the
// whole remaining key to every element and gathers what matched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonKey(Vec<String>);

impl JsonKey {
    /// Look the key up in `event`. A missing field, a JSON null, or a key that runs into a
    /// scalar all come back as None. Arrays aggregate: every element is searched with the
    /// full key, array results are spliced one level, and a non-empty aggregate is always
    /// returned as an array, even if only one element matched.
    pub fn get(&self, event: &Value) -> Option<Value> {
        if self.0.is_empty() {
            return None;
        }
        extract(&self.0, event)
    }
}

fn extract(path: &[String], node: &Value) -> Option<Value> {
    let (head, tail) = path.split_first()?;
    match node {
        Value::Object(map) => {
            let child = map.get(head)?;
            if tail.is_empty() {
                (!child.is_null()).then(|| child.clone())
            } else {
                extract(tail, child)
            }
        }
        Value::Array(items) => {
            let mut results = Vec::new();
            for item in items {
                match extract(path, item) {
                    Some(Value::Array(nested)) => results.extend(nested),
                    Some(v) => results.push(v),
                    None => {}
                }
            }
            (!results.is_empty()).then_some(Value::Array(results))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
    }
}

impl From<String> for JsonKey {
    fn from(s: String) -> Self {
        JsonKey::from(s.as_str())
    }
}

impl From<&str> for JsonKey {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            return JsonKey(Vec::new());
        }
        JsonKey(s.split('.').map(|s| s.to_string()).collect())
    }
}
