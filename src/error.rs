//! Error types for the MCP relay
//!
//! This module defines the error hierarchy for the server-side router and
//! the client-side invocation layer.

use std::time::Duration;

use thiserror::Error;

use crate::client::types::RequestId;
use crate::protocol::codes;

/// Main error type for the MCP relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Tool registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Argument validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Terminal invocation failures
    #[error("Invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Tool registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },

    #[error("Resource already registered: {uri}")]
    DuplicateResource { uri: String },

    #[error("Unknown tool: {name}")]
    ToolNotFound { name: String },

    #[error("Unknown resource: {uri}")]
    ResourceNotFound { uri: String },
}

/// Argument validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Arguments must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid type for field '{field}': expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid environment variable {var}: {message}")]
    InvalidEnvVar { var: String, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Failures a tool or resource handler reports back to the router
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A failure whose message is safe to show to the caller
    #[error("{0}")]
    Failed(String),

    /// Arguments passed schema validation but are semantically wrong
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// A downstream dependency of the handler is rate limiting us
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Anything else; logged server-side, never sent to the caller
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Normalized router failures, each with a wire code and HTTP status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Unknown tool: {name}")]
    ToolNotFound { name: String },

    #[error("Unknown resource: {uri}")]
    ResourceNotFound { uri: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("'{name}' did not finish within {timeout:?}")]
    HandlerTimeout { name: String, timeout: Duration },

    #[error("{message}")]
    HandlerFailure { message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server is at its concurrent handler limit")]
    Overloaded,
}

impl RouterError {
    /// Stable wire code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::ToolNotFound { .. } | RouterError::ResourceNotFound { .. } => {
                codes::NOT_FOUND
            }
            RouterError::Validation(_)
            | RouterError::InvalidArguments { .. }
            | RouterError::MalformedRequest { .. } => codes::VALIDATION_ERROR,
            RouterError::HandlerTimeout { .. } => codes::HANDLER_TIMEOUT,
            RouterError::HandlerFailure { .. } => codes::HANDLER_FAILURE,
            RouterError::RateLimited { .. } => codes::RATE_LIMITED,
            RouterError::Overloaded => codes::OVERLOADED,
        }
    }

    /// HTTP status the error is reported with
    pub fn status(&self) -> u16 {
        match self {
            RouterError::ToolNotFound { .. }
            | RouterError::ResourceNotFound { .. }
            | RouterError::Validation(_)
            | RouterError::InvalidArguments { .. }
            | RouterError::MalformedRequest { .. } => 400,
            RouterError::HandlerTimeout { .. } => 408,
            RouterError::RateLimited { .. } => 429,
            RouterError::HandlerFailure { .. } => 500,
            RouterError::Overloaded => 503,
        }
    }
}

/// Classified failure of a single invocation, as seen by the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("handler timed out: {message}")]
    HandlerTimeout { message: String },

    #[error("handler failed: {message}")]
    HandlerFailure { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("no response within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("server '{server_id}' is unreachable")]
    Unreachable { server_id: String },

    #[error("service unavailable after {attempts} attempts, last error: {last}")]
    ServiceUnavailable { attempts: u32, last: Box<FailureKind> },

    #[error("invocation cancelled")]
    Cancelled,
}

/// Terminal invocation error, correlated with the request that produced it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request {request_id}: {kind}")]
pub struct InvocationError {
    pub request_id: RequestId,
    pub kind: FailureKind,
}

impl InvocationError {
    pub fn new(request_id: RequestId, kind: FailureKind) -> Self {
        Self { request_id, kind }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
