//! Tool server: registry, request router and HTTP surface

pub mod builtin;
pub mod http;
pub mod registry;
pub mod router;
pub mod schema;

pub use registry::{
    ResourceDescriptor, ResourceHandler, ResourceRequest, ToolDescriptor, ToolHandler,
    ToolRegistry,
};
pub use router::RequestRouter;
pub use schema::{FieldType, InputSchema};
