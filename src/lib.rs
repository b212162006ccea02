//! MCP Relay Library
//!
//! A tool-invocation layer for Model Context Protocol style servers.
//! The server side registers tools and resources and routes validated calls
//! to their handlers over HTTP. The client side invokes them with connection
//! pooling, health tracking, response caching and retries.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{InvocationExecutor, InvocationResult, InvokeOptions};
pub use config::{ClientConfig, ServerConfig};
pub use error::{RelayError, Result};
pub use server::{RequestRouter, ToolRegistry};
