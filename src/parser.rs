use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::TargetSpec;
use crate::error::PollError;
use crate::logs::{render_value, LogBatch, LogEntry, LogValue, NOT_FOUND};
use crate::JsonKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Text,
}

impl PayloadFormat {
    /// Pick a format from a response content type. Anything that isn't JSON is read as text,
    /// including a missing header.
    pub fn detect(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("application/json") {
            PayloadFormat::Json
        } else {
            PayloadFormat::Text
        }
    }
}

/// Turn a response body into a batch of log entries for `target`. Only fails when the content
/// type says JSON and the body doesn't parse.
pub fn parse(body: &[u8], content_type: &str, target: &TargetSpec) -> Result<LogBatch, PollError> {
    match PayloadFormat::detect(content_type) {
        PayloadFormat::Json => parse_json(body, target),
        PayloadFormat::Text => Ok(parse_text(body, target)),
    }
}

/// The whole payload becomes a single entry, whether it's an object or an array. Labels are
/// resolved against the payload with [JsonKey].
pub fn parse_json(body: &[u8], target: &TargetSpec) -> Result<LogBatch, PollError> {
    let payload: Value = serde_json::from_slice(body)?;

    let mut batch = LogBatch::new(base_resource(target));

    let mut entry = LogEntry::new(&target.log_level, LogValue::from(&payload));
    for (label, path) in &target.labels {
        let value = JsonKey::from(path.as_str())
            .get(&payload)
            .map(|v| render_value(&v))
            .unwrap_or_else(|| NOT_FOUND.to_string());
        entry.attributes.insert(label.clone(), value);
    }
    batch.entries.push(entry);

    Ok(batch)
}

/// One entry per non-blank line. Labels can't be resolved against text, so they're copied
/// onto the resource as they are.
pub fn parse_text(body: &[u8], target: &TargetSpec) -> LogBatch {
    let mut resource = base_resource(target);
    for (label, value) in &target.labels {
        resource.insert(label.clone(), value.clone());
    }
    let mut batch = LogBatch::new(resource);

    let text = String::from_utf8_lossy(body);
    batch.entries = text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| LogEntry::new(&target.log_level, LogValue::Str(line.to_string())))
        .collect();

    batch
}

fn base_resource(target: &TargetSpec) -> BTreeMap<String, String> {
    let mut resource = BTreeMap::new();
    resource.insert("endpoint".to_string(), target.endpoint.clone());
    resource.insert("service.name".to_string(), target.service_name.clone());
    resource
}
