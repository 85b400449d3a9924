use thiserror::Error;

/// Reasons a collector config is rejected. Any of these stops the collector from being built.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,

    #[error("endpoint must be specified")]
    MissingEndpoint,

    #[error("\"endpoint\" must be in the form of <scheme>://<hostname>[:<port>]: {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid collection_interval {0:?}")]
    InvalidInterval(String),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything that can abort a single poll of a single target. None of these are retried,
/// and none of them affect other targets.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("failed to create request: {0}")]
    RequestBuild(String),

    #[error("failed to execute request: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("HTTP error: {code} {text}")]
    Status { code: u16, text: String },

    #[error("failed to unmarshal JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to consume logs: {0}")]
    Sink(#[source] anyhow::Error),

    #[error("poll cancelled by shutdown")]
    Cancelled,

    #[error("poll task failed: {0}")]
    Aborted(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler already running")]
    AlreadyRunning,

    #[error("scheduler has been stopped and cannot be restarted")]
    Stopped,
}
