//! Error types for the acquisition and logging engine
//!
//! Every failure is classified so the resilience loop can dispatch on kind
//! instead of inspecting messages.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for plclog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the plclog system
#[derive(Error, Debug)]
pub enum Error {
    /// Session handshake failed or the endpoint is unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single identifier could not be resolved to a live handle
    #[error("Resolution error for {identifier}: {message}")]
    Resolution {
        /// The identifier that failed to resolve
        identifier: String,
        /// Transport-provided reason
        message: String,
    },

    /// Not a single catalog entry resolved during connect
    #[error("No variables resolved ({attempted} attempted)")]
    NothingResolved {
        /// Number of identifiers that were tried
        attempted: usize,
    },

    /// Batched read failed mid-session
    #[error("Read error: {0}")]
    Read(String),

    /// Subscription registration failed or the subscription was lost
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A transport call did not complete in time
    #[error("Timed out after {after:?} during {operation}")]
    Timeout {
        /// Which transport operation timed out
        operation: Operation,
        /// The configured bound
        after: Duration,
    },

    /// Durable log or metadata store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Raw I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors, detected before the first connect
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Transport operation names, used to classify timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Disconnect,
    Resolve,
    Read,
    CreateSubscription,
    Subscribe,
    DeleteSubscription,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Resolve => "resolve",
            Operation::Read => "read",
            Operation::CreateSubscription => "create_subscription",
            Operation::Subscribe => "subscribe",
            Operation::DeleteSubscription => "delete_subscription",
        };
        f.write_str(name)
    }
}

/// Failure classes the resilience loop dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Connection,
    Resolution,
    Read,
    Subscription,
    Storage,
    Configuration,
    Other,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Connection => "connection",
            ErrorClass::Resolution => "resolution",
            ErrorClass::Read => "read",
            ErrorClass::Subscription => "subscription",
            ErrorClass::Storage => "storage",
            ErrorClass::Configuration => "configuration",
            ErrorClass::Other => "other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a per-identifier resolution error
    pub fn resolution(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Create a read error
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Create a subscription error
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: Operation, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Connection(_) | Error::NothingResolved { .. } => ErrorClass::Connection,
            Error::Resolution { .. } => ErrorClass::Resolution,
            Error::Read(_) => ErrorClass::Read,
            Error::Subscription(_) => ErrorClass::Subscription,
            Error::Timeout { operation, .. } => match operation {
                Operation::Connect | Operation::Disconnect => ErrorClass::Connection,
                Operation::Resolve => ErrorClass::Resolution,
                Operation::Read => ErrorClass::Read,
                Operation::CreateSubscription
                | Operation::Subscribe
                | Operation::DeleteSubscription => ErrorClass::Subscription,
            },
            Error::Storage(_) | Error::Io(_) | Error::Json(_) => ErrorClass::Storage,
            Error::Config(_) => ErrorClass::Configuration,
            Error::Other(_) => ErrorClass::Other,
        }
    }

    /// Whether the resilience loop should reconnect and carry on
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Connection
                | ErrorClass::Resolution
                | ErrorClass::Read
                | ErrorClass::Subscription
                | ErrorClass::Other
        )
    }

    /// Whether the process must stop
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
