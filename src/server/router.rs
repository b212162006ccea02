//! Request router
//!
//! Validates incoming calls against the registry, runs the handler under its
//! declared timeout, and normalizes every failure into a `RouterError`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;

use crate::config::ServerConfig;
use crate::error::{HandlerError, RouterError};
use crate::protocol::{ResourceContents, ResourceInfo, ToolInfo};
use crate::server::registry::ToolRegistry;

/// Dispatches tool calls and resource reads to registered handlers
pub struct RequestRouter {
    registry: Arc<ToolRegistry>,

    /// Bounds concurrently running handlers
    handler_slots: Arc<Semaphore>,

    resource_timeout: Duration,
}

impl RequestRouter {
    pub fn new(registry: Arc<ToolRegistry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            handler_slots: Arc::new(Semaphore::new(config.max_concurrent_handlers)),
            resource_timeout: config.resource_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handlers that can start right now
    pub fn available_slots(&self) -> usize {
        self.handler_slots.available_permits()
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list().map(|d| d.to_info()).collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.registry.list_resources().map(|d| d.to_info()).collect()
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RouterError> {
        let tool = self
            .registry
            .lookup(name)
            .map_err(|_| RouterError::ToolNotFound {
                name: name.to_string(),
            })?;

        let arguments = tool.descriptor.input_schema.validate(&arguments)?;

        let permit = self
            .handler_slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| RouterError::Overloaded)?;

        let handler = tool.handler();
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            let _permit = permit;
            handler.call(arguments).await
        }));

        let timeout = tool.descriptor.timeout;
        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::warn!("Tool {} timed out after {:?}", name, timeout);
                Err(RouterError::HandlerTimeout {
                    name: name.to_string(),
                    timeout,
                })
            }
            Ok(Err(join_error)) => Err(panicked(name, join_error)),
            Ok(Ok(Err(handler_error))) => Err(normalize(name, handler_error)),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }

    /// Read a resource by concrete URI
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, RouterError> {
        let (resource, request) =
            self.registry
                .lookup_resource(uri)
                .map_err(|_| RouterError::ResourceNotFound {
                    uri: uri.to_string(),
                })?;

        let permit = self
            .handler_slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| RouterError::Overloaded)?;

        let handler = resource.handler();
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            let _permit = permit;
            handler.read(request).await
        }));

        match tokio::time::timeout(self.resource_timeout, task).await {
            Err(_) => {
                tracing::warn!("Resource {} timed out after {:?}", uri, self.resource_timeout);
                Err(RouterError::HandlerTimeout {
                    name: uri.to_string(),
                    timeout: self.resource_timeout,
                })
            }
            Ok(Err(join_error)) => Err(panicked(uri, join_error)),
            Ok(Ok(Err(handler_error))) => Err(normalize(uri, handler_error)),
            Ok(Ok(Ok(content))) => Ok(ResourceContents {
                uri: uri.to_string(),
                mime_type: resource.descriptor.mime_type.clone(),
                content,
            }),
        }
    }
}

/// Map a handler failure to its wire form. Internal errors are logged here
/// and replaced by a generic message.
fn normalize(name: &str, error: HandlerError) -> RouterError {
    match error {
        HandlerError::Failed(message) => RouterError::HandlerFailure { message },
        HandlerError::InvalidArguments(message) => RouterError::InvalidArguments { message },
        HandlerError::RateLimited { retry_after } => RouterError::RateLimited { retry_after },
        HandlerError::Internal(err) => {
            tracing::error!("'{}' failed: {:#}", name, err);
            RouterError::HandlerFailure {
                message: format!("'{}' failed with an internal error", name),
            }
        }
    }
}

fn panicked(name: &str, error: JoinError) -> RouterError {
    tracing::error!("'{}' handler aborted: {}", name, error);
    RouterError::HandlerFailure {
        message: format!("'{}' failed with an internal error", name),
    }
}
