//! Invocation request and result types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{FailureKind, InvocationError};

/// Correlates one caller's invocation with its result and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an invocation addresses on the server
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Tool { name: String, arguments: Value },
    Resource { uri: String },
}

impl Target {
    /// Tool name or resource URI, for logs
    pub fn label(&self) -> &str {
        match self {
            Target::Tool { name, .. } => name,
            Target::Resource { uri } => uri,
        }
    }
}

/// One request/response cycle against a tool or resource
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub id: RequestId,
    pub server_id: String,
    pub target: Target,
    pub issued_at: DateTime<Utc>,
    /// Monotonic issue time; latency is measured from here
    pub started: Instant,
}

impl InvocationRequest {
    pub fn tool(server_id: &str, name: &str, arguments: Value) -> Self {
        Self::new(
            server_id,
            Target::Tool {
                name: name.to_string(),
                arguments,
            },
        )
    }

    pub fn resource(server_id: &str, uri: &str) -> Self {
        Self::new(
            server_id,
            Target::Resource {
                uri: uri.to_string(),
            },
        )
    }

    fn new(server_id: &str, target: Target) -> Self {
        Self {
            id: RequestId::new(),
            server_id: server_id.to_string(),
            target,
            issued_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Overrides the configured per-attempt timeout
    pub timeout: Option<Duration>,

    /// Skip the cache lookup and single-flight; a fresh result is still stored
    pub bypass_cache: bool,

    /// Aborts this caller's wait when cancelled
    pub cancel: Option<CancellationToken>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Outcome of an invocation as seen by one caller
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub request_id: RequestId,
    pub outcome: Result<Value, InvocationError>,
    /// Time from issue to result
    pub latency: Duration,
    /// Network attempts made; 0 for cache hits and unreachable servers
    pub attempts: u32,
    pub from_cache: bool,
}

impl InvocationResult {
    pub(crate) fn new(
        request: &InvocationRequest,
        outcome: Result<Value, FailureKind>,
        attempts: u32,
        from_cache: bool,
    ) -> Self {
        Self {
            request_id: request.id,
            outcome: outcome.map_err(|kind| InvocationError::new(request.id, kind)),
            latency: request.started.elapsed(),
            attempts,
            from_cache,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Failure kind, if the invocation failed
    pub fn failure(&self) -> Option<&FailureKind> {
        self.outcome.as_ref().err().map(|e| &e.kind)
    }

    pub fn into_result(self) -> Result<Value, InvocationError> {
        self.outcome
    }
}
