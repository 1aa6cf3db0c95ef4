use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure categories surfaced to callers of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 4xx other than 408/429, or an auth-style message. Never retried.
    ClientError,
    /// 5xx response from the downstream service
    ServerError,
    /// 429 from the downstream service
    RateLimited,
    /// 408, a timeout-style message, or a lost `execute_with_timeout` race
    Timeout,
    /// The service's breaker is open and the operation was not attempted
    CircuitOpen,
    /// The service's limiter rejected the call at its burst ceiling
    BurstLimit,
    /// Connection-level failure
    Network,
    /// Nothing more specific is known
    Unknown,
}

impl ErrorKind {
    /// Retryability implied by the kind alone
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::ClientError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ClientError => "client_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::BurstLimit => "burst_limit",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error produced by an outbound operation or by the execution layer itself.
///
/// Operations may build one directly (`ApiError::http`, `ApiError::new`) or
/// return any type convertible into it. Before an error leaves the
/// orchestrator it is classified and stamped with the service, operation and
/// time of the attempt.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub service: String,
    pub operation: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Error of a known kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            service: String::new(),
            operation: String::new(),
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    /// Error carrying an HTTP status; the kind is derived from the status
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = crate::classify::classify(Some(status), &message);
        Self {
            status: Some(status),
            ..Self::new(kind, message)
        }
    }

    /// Error known only by its message; classification falls back to the text
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the call-site labels and attempt time
    pub fn with_context(
        mut self,
        service: impl Into<String>,
        operation: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        self.service = service.into();
        self.operation = operation.into();
        self.timestamp = timestamp;
        self
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }

    pub fn is_burst_limit(&self) -> bool {
        self.kind == ErrorKind::BurstLimit
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrNotAvailable
            | Io::BrokenPipe
            | Io::UnexpectedEof => ErrorKind::Network,
            Io::PermissionDenied => ErrorKind::ClientError,
            _ => ErrorKind::Unknown,
        };
        ApiError::new(kind, err.to_string())
    }
}

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        ApiError::from_message(message)
    }
}

impl From<&str> for ApiError {
    fn from(message: &str) -> Self {
        ApiError::from_message(message)
    }
}

/// Errors raised outside of call execution: configuration loading and the CLI
#[derive(Error, Debug)]
pub enum CallgateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfiguration { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Api(#[from] ApiError),
}

pub type CallgateResult<T> = std::result::Result<T, CallgateError>;
