//! Client side: connection management, response cache, error classification
//! and the invocation executor

pub mod cache;
pub mod classifier;
pub mod connection;
pub mod executor;
pub mod types;

pub use cache::{CacheKey, ResponseCache};
pub use classifier::{BackoffPolicy, ErrorCategory};
pub use connection::{Connection, ConnectionManager, ConnectionState, EndpointSnapshot, Outcome};
pub use executor::{CallSettings, InvocationExecutor, ServerCatalog};
pub use types::{InvocationRequest, InvocationResult, InvokeOptions, RequestId, Target};
