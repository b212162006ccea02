//! Wire protocol shared by the tool server and the invocation client
//!
//! JSON bodies exchanged over the HTTP surface, the error codes carried in
//! error envelopes, and the route paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the client's request id, for log correlation
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `POST /tools/call` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name
    pub name: String,

    /// Tool arguments
    #[serde(default)]
    pub arguments: Value,
}

/// Success envelope: `{"result": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub result: T,
}

/// Error envelope: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Structured error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Tool entry in `GET /tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Input schema (JSON Schema)
    pub schema: Value,

    #[serde(default)]
    pub cacheable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Resource entry in `GET /resources/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// URI or URI template (`notes://{id}`)
    pub uri: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub mime_type: String,

    #[serde(default)]
    pub cacheable: bool,
}

/// `GET /resources/read` query string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceQuery {
    pub uri: String,
}

/// Result of a resource read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub content: String,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Error codes carried in error envelopes
pub mod codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const HANDLER_TIMEOUT: &str = "handler_timeout";
    pub const HANDLER_FAILURE: &str = "handler_failure";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const OVERLOADED: &str = "overloaded";
}

/// HTTP routes
pub mod paths {
    pub const CALL_TOOL: &str = "/tools/call";
    pub const LIST_TOOLS: &str = "/tools/list";
    pub const LIST_RESOURCES: &str = "/resources/list";
    pub const READ_RESOURCE: &str = "/resources/read";
    pub const HEALTH: &str = "/health";
}
