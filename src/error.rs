/// Error taxonomy for the session.
///
/// Only `ConfigError` is fatal, and only before the loop starts. Everything
/// else is rendered to the user or fed back into the conversation.
use std::path::PathBuf;

use thiserror::Error;

/// The model's reply looked like a plan but could not be trusted.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Candidate JSON did not parse at all. Shown verbatim as chat.
    #[error("reply is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// JSON parsed but an action violates the schema. The whole plan is rejected.
    #[error("action {index}: {reason}")]
    Invalid { index: usize, reason: String },

    #[error("plan contains no actions")]
    Empty,
}

impl PlanError {
    /// Validation failures are fed back to the model; malformed JSON is just chat.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PlanError::Malformed(_))
    }
}

/// Failure while applying a single approved action.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("path '{0}' escapes the project root")]
    PathEscapes(String),

    #[error("'{0}' does not exist")]
    NotFound(String),

    #[error("no content given for '{0}'")]
    MissingContent(String),

    #[error("patch failed: {0}")]
    Patch(String),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Chat provider request failed.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Startup misconfiguration. Aborts before the loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {what} configured (set {env}, pass --{flag}, or add it to a profile in {config})")]
    Missing {
        what: &'static str,
        env: &'static str,
        flag: &'static str,
        config: String,
    },

    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("profile '{0}' not found in config file")]
    UnknownProfile(String),
}
