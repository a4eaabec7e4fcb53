// =============================================================================
// error.rs - EVERY WAY A COLLECTION RUN CAN GO SIDEWAYS
// =============================================================================
//
// One error type for the whole reactor. Collaborator modules, the loader,
// the syslog emitter and the job registry all speak `ReactorError`, so the
// runner can tell a missing keyword file apart from a SIEM that stopped
// answering without guessing from a boolean.
// =============================================================================

use thiserror::Error;

use crate::models::JobStatus;

#[derive(Debug, Error)]
pub enum ReactorError {
    /// A config, keyword or source file does not exist.
    #[error("unable to load {path}: file not found")]
    ConfigMissing { path: String },

    /// The config file exists but could not be parsed or is missing keys.
    #[error("config error: {0}")]
    Config(String),

    /// The load phase produced no usable entries.
    #[error("module {module} has no inputs to work with")]
    EmptyInput { module: String },

    /// Syslog send or HTTP fetch failed at the transport level.
    #[error("transport failure talking to {target}: {reason}")]
    Transport { target: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot find job {0}")]
    JobNotFound(String),

    #[error("job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("run cancelled by shutdown")]
    Cancelled,

    #[error("job {name} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl From<::config::ConfigError> for ReactorError {
    fn from(err: ::config::ConfigError) -> Self {
        ReactorError::Config(err.to_string())
    }
}

impl ReactorError {
    pub fn transport(target: impl Into<String>, reason: impl ToString) -> Self {
        ReactorError::Transport {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same request later has a reasonable chance of
    /// succeeding. Collection modules use this to decide between re-queueing
    /// an item and counting it as a failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ReactorError::Transport { .. } => true,
            ReactorError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                match e.status() {
                    Some(status) => status.as_u16() == 429 || status.is_server_error(),
                    None => false,
                }
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
