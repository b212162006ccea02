//! Built-in diagnostic tools
//!
//! `mcp-relay serve` registers these so a fresh server has something to call.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::error::{HandlerError, RegistryError};
use crate::server::registry::{ResourceDescriptor, ResourceRequest, ToolDescriptor, ToolRegistry};
use crate::server::schema::{FieldType, InputSchema};

pub const ECHO_TOOL: &str = "echo";
pub const INFO_RESOURCE: &str = "relay://info";

/// Register the `echo` tool and the `relay://info` resource
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        ToolDescriptor::new(ECHO_TOOL, "Return the given message unchanged")
            .with_schema(
                InputSchema::new()
                    .required("message", FieldType::String, "Text to echo back")
                    .optional("uppercase", FieldType::Boolean, "Upper-case the reply"),
            )
            .cacheable(true),
        Arc::new(|args: Map<String, Value>| async move { echo(args) }),
    )?;

    registry.register_resource(
        ResourceDescriptor::new(INFO_RESOURCE, "Server info")
            .with_description("Name, version and start time of this server")
            .with_mime_type("application/json"),
        Arc::new(info_reader()),
    )?;

    Ok(())
}

fn echo(args: Map<String, Value>) -> Result<Value, HandlerError> {
    let message = args
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidArguments("message must be a string".into()))?;

    let uppercase = args
        .get("uppercase")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let reply = if uppercase {
        message.to_uppercase()
    } else {
        message.to_string()
    };
    Ok(json!({ "message": reply }))
}

fn info_reader() -> impl Fn(ResourceRequest) -> std::future::Ready<Result<String, HandlerError>> {
    let started_at = Utc::now();
    move |_request: ResourceRequest| {
        let info = json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "startedAt": started_at.to_rfc3339(),
        });
        std::future::ready(Ok(info.to_string()))
    }
}
