//! Error types for qless client operations.
//!
//! Two layers are distinguished:
//! - [`TransportError`]: what the connection to the backing store reports
//!   (connection failures, unknown script hashes, runtime error replies)
//! - [`QlessError`]: what callers of the client see, with runtime errors
//!   classified into queue-semantic conditions such as lease loss

use thiserror::Error;

use crate::config::ConfigError;

/// Errors reported by a [`Transport`](crate::script::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The runtime has no script cached under this hash.
    #[error("NOSCRIPT: no script cached for hash {0}")]
    NoScript(String),

    /// The script ran and returned an error reply.
    #[error("Script error: {0}")]
    Script(String),

    /// Connection failure, timeout or I/O error.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Reply could not be interpreted at the protocol level.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for TransportError {
    fn from(err: redis::RedisError) -> Self {
        use redis::ErrorKind;

        match err.kind() {
            ErrorKind::NoScriptError => TransportError::NoScript(err.to_string()),
            ErrorKind::ResponseError | ErrorKind::ExtensionError => {
                TransportError::Script(err.to_string())
            }
            ErrorKind::TypeError => TransportError::Protocol(err.to_string()),
            _ => TransportError::Connection(err.to_string()),
        }
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum QlessError {
    /// Connection or timeout failure; never recovered locally.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A reply did not have the expected shape.
    #[error("Failed to decode '{op}' reply: {message}")]
    Decode {
        op: String,
        message: String,
        raw: Vec<u8>,
    },

    /// The script stayed uncached after one reload-and-retry.
    #[error("Script '{0}' unavailable after reload")]
    ScriptUnavailable(String),

    /// The caller no longer holds the lease on the job.
    #[error("Lease lost during '{op}': {message}")]
    LeaseLost { op: String, message: String },

    /// The requested job or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A config value was neither a byte string nor an integer.
    #[error("Unsupported config type for '{option}': {kind}")]
    UnsupportedConfigType { option: String, kind: String },

    /// Any other error raised by the script runtime.
    #[error("Script error during '{op}': {message}")]
    Script { op: String, message: String },

    /// The dispatcher has no script registered under this name.
    #[error("Unknown script '{0}'")]
    UnknownScript(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The instance was built without a client back-reference.
    #[error("'{0}' has no client attached")]
    Detached(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QlessError {
    /// Builds a decode error, keeping the raw reply for diagnosis.
    pub fn decode(op: &str, raw: impl Into<Vec<u8>>, message: impl Into<String>) -> Self {
        QlessError::Decode {
            op: op.to_string(),
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Classifies a transport error raised while running `op`.
    ///
    /// Runtime error replies are mapped onto semantic conditions by the
    /// messages the script library raises; the message is kept verbatim.
    pub fn from_transport(op: &str, err: TransportError) -> Self {
        match err {
            TransportError::Script(message) => classify_script_error(op, message),
            other => QlessError::Transport(other),
        }
    }

    /// Returns true for the lease-lost condition.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, QlessError::LeaseLost { .. })
    }

    /// Returns true for the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QlessError::NotFound(_))
    }
}

fn classify_script_error(op: &str, message: String) -> QlessError {
    let lowered = message.to_lowercase();
    if lowered.contains("does not exist") {
        QlessError::NotFound(message)
    } else if lowered.contains("another worker") || lowered.contains("not currently running") {
        QlessError::LeaseLost {
            op: op.to_string(),
            message,
        }
    } else {
        QlessError::Script {
            op: op.to_string(),
            message,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QlessError>;
