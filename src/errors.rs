//! Error types shared across the application.

use std::any::Any;
use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all engine and plumbing failure modes.
///
/// Failures of user code are never represented here: they surface as terminal
/// cell statuses on the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Operation referenced an evaluation context that does not exist or was destroyed.
    UnknownContext(String),
    /// The compiler collaborator could not initialize a new context.
    ContextCreation(String),
    /// The compiler collaborator failed while checking or analyzing a submission.
    Compiler(String),
    /// The evaluator connection was lost before an answer arrived.
    Disconnected(String),
    /// Wire framing or message-shape failure.
    Protocol(String),
    /// Request was well-formed JSON but not a valid request.
    InvalidRequest(String),
    /// IPC listener or connection failure.
    Ipc(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Unexpected failure caught at the request-handling boundary.
    Internal(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::UnknownContext(msg) => write!(f, "unknown context: {msg}"),
            Self::ContextCreation(msg) => write!(f, "context creation: {msg}"),
            Self::Compiler(msg) => write!(f, "compiler: {msg}"),
            Self::Disconnected(msg) => write!(f, "disconnected: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Extract the message carried by a caught panic, if it is a string.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}
