//! Tool and resource registry
//!
//! Populated once at server startup through `&mut self`, then shared behind
//! an `Arc` so lookups need no locking.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{HandlerError, RegistryError};
use crate::protocol::{ResourceInfo, ToolInfo};
use crate::server::schema::InputSchema;

/// Timeout applied to tools that do not declare one
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes a tool with validated arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, HandlerError> {
        (self)(arguments).await
    }
}

/// A concrete resource read, with any values captured from the URI template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub uri: String,
    pub params: BTreeMap<String, String>,
}

/// Produces the content of a resource
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, request: ResourceRequest) -> Result<String, HandlerError>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(ResourceRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    async fn read(&self, request: ResourceRequest) -> Result<String, HandlerError> {
        (self)(request).await
    }
}

/// Tool metadata, immutable once registered
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    /// Results may be cached by clients; leave off for side-effecting tools
    pub cacheable: bool,
    pub timeout: Duration,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::default(),
            cacheable: false,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn to_info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.input_schema.to_json_schema(),
            cacheable: self.cacheable,
            timeout_ms: Some(self.timeout.as_millis() as u64),
        }
    }
}

/// Resource metadata
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// Exact URI, or a template with `{param}` placeholders
    pub uri_pattern: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    pub cacheable: bool,
}

impl ResourceDescriptor {
    pub fn new(uri_pattern: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_pattern: uri_pattern.into(),
            name: name.into(),
            description: String::new(),
            mime_type: "text/plain".to_string(),
            cacheable: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn to_info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: self.uri_pattern.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            cacheable: self.cacheable,
        }
    }
}

/// A registered tool and its handler
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        self.handler.clone()
    }
}

/// A registered resource and its handler
pub struct RegisteredResource {
    pub descriptor: ResourceDescriptor,
    handler: Arc<dyn ResourceHandler>,
}

impl RegisteredResource {
    pub fn handler(&self) -> Arc<dyn ResourceHandler> {
        self.handler.clone()
    }
}

/// Catalog of tools and resources served by one server
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    resources: BTreeMap<String, RegisteredResource>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique per server.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool {
                name: descriptor.name,
            });
        }

        tracing::debug!("Registered tool {}", descriptor.name);
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Register a resource. URI patterns are unique per server.
    pub fn register_resource(
        &mut self,
        descriptor: ResourceDescriptor,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<(), RegistryError> {
        if self.resources.contains_key(&descriptor.uri_pattern) {
            return Err(RegistryError::DuplicateResource {
                uri: descriptor.uri_pattern,
            });
        }

        tracing::debug!("Registered resource {}", descriptor.uri_pattern);
        self.resources.insert(
            descriptor.uri_pattern.clone(),
            RegisteredResource {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, RegistryError> {
        self.tools.get(name).ok_or_else(|| RegistryError::ToolNotFound {
            name: name.to_string(),
        })
    }

    /// Find the resource serving `uri`. Exact patterns win over templates.
    pub fn lookup_resource(
        &self,
        uri: &str,
    ) -> Result<(&RegisteredResource, ResourceRequest), RegistryError> {
        if let Some(resource) = self.resources.get(uri) {
            return Ok((
                resource,
                ResourceRequest {
                    uri: uri.to_string(),
                    params: BTreeMap::new(),
                },
            ));
        }

        self.resources
            .values()
            .find_map(|resource| {
                match_uri_template(&resource.descriptor.uri_pattern, uri).map(|params| {
                    (
                        resource,
                        ResourceRequest {
                            uri: uri.to_string(),
                            params,
                        },
                    )
                })
            })
            .ok_or_else(|| RegistryError::ResourceNotFound {
                uri: uri.to_string(),
            })
    }

    /// Tool descriptors in name order. The iterator can be cloned to restart.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> + Clone + '_ {
        self.tools.values().map(|tool| &tool.descriptor)
    }

    /// Resource descriptors in URI order
    pub fn list_resources(&self) -> impl Iterator<Item = &ResourceDescriptor> + Clone + '_ {
        self.resources.values().map(|resource| &resource.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
}

fn parse_template(pattern: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            break;
        };
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        segments.push(Segment::Param(&rest[open + 1..close]));
        rest = &rest[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Match `uri` against a template such as `notes://{id}`.
///
/// Each placeholder captures a non-empty run without `/`, ending at the next
/// literal. Returns the captured values, or `None` when the URI does not fit.
pub fn match_uri_template(pattern: &str, uri: &str) -> Option<BTreeMap<String, String>> {
    if !pattern.contains('{') {
        return (pattern == uri).then(BTreeMap::new);
    }

    let segments = parse_template(pattern);
    let mut params = BTreeMap::new();
    let mut pos = 0;

    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Literal(literal) => {
                if !uri[pos..].starts_with(literal) {
                    return None;
                }
                pos += literal.len();
            }
            Segment::Param(name) => {
                let end = match segments.get(i + 1) {
                    Some(Segment::Literal(next)) => pos + uri[pos..].find(next)?,
                    _ => uri.len(),
                };
                let value = &uri[pos..end];
                if value.is_empty() || value.contains('/') {
                    return None;
                }
                params.insert(name.to_string(), value.to_string());
                pos = end;
            }
        }
    }

    (pos == uri.len()).then_some(params)
}
