use std::{collections::HashMap, path::Path, time::Duration};

use reqwest::Url;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_SERVICE_NAME: &str = "logs-receiver";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Top level collector configuration. Build it from a file with [CollectorConfig::from_file],
/// then call [CollectorConfig::validate] (or hand it to [crate::Scheduler::from_config],
/// which does) before polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// How long to wait between the start of one poll round and the next. Zero (or anything
    /// negative in the file) falls back to 30s on validation.
    #[serde(deserialize_with = "deserialize_interval")]
    pub collection_interval: Duration,
    pub targets: Vec<TargetSpec>,
}

/// One HTTP endpoint to poll. Empty strings mean "unset" - validation fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    pub endpoint: String,
    pub method: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    /// Service name to assign to logs
    pub service_name: String,
    /// Level to assign to every log entry produced from this target
    pub log_level: String,
    /// Label name to dot-path. JSON responses resolve the path against the payload, text
    /// responses copy the pair onto the batch as-is.
    pub labels: HashMap<String, String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
            targets: Vec::new(),
        }
    }
}

impl CollectorConfig {
    /// Load a config from a TOML file. The result is not validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Check the config, filling in defaults in place
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        if self.collection_interval.is_zero() {
            self.collection_interval = DEFAULT_COLLECTION_INTERVAL;
        }

        for target in &mut self.targets {
            target.validate()?;
        }

        Ok(())
    }
}

impl TargetSpec {
    pub fn new(endpoint: impl Into<String>) -> Self {
        TargetSpec {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        if !url.has_host() {
            return Err(invalid("missing host".to_string()));
        }

        if self.method.is_empty() {
            self.method = DEFAULT_METHOD.to_string();
        }
        if self.service_name.is_empty() {
            self.service_name = DEFAULT_SERVICE_NAME.to_string();
        }
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }

        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Seconds(i64),
    Text(String),
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawInterval::deserialize(deserializer)? {
        RawInterval::Seconds(secs) => Ok(Duration::from_secs(secs.max(0) as u64)),
        RawInterval::Text(text) => parse_interval(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse durations like "250ms", "30s", "5m", "1h" or "1m30s". Negative durations parse to
/// zero, so they pick up the default interval on validation.
pub fn parse_interval(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidInterval(text.to_string());
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('-') {
        parse_interval(rest)?;
        return Ok(Duration::ZERO);
    }
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(invalid)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(invalid)?),
            _ => return Err(invalid()),
        };
        total = total.checked_add(unit).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}
