//! Invocation executor
//!
//! Runs tool calls and resource reads against configured servers: cache
//! lookup, single-flight coalescing of identical calls, connection leasing,
//! classification of failures and retry with backoff.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::cache::{CacheKey, ResponseCache};
use crate::client::classifier::{
    categorize, classify_response, classify_transport, is_retryable, parse_retry_after,
    BackoffPolicy, ErrorCategory,
};
use crate::client::connection::{Connection, ConnectionManager, Outcome};
use crate::client::types::{InvocationRequest, InvocationResult, InvokeOptions, RequestId, Target};
use crate::config::{ClientConfig, ServerSettings, ToolOverrides};
use crate::error::{FailureKind, Result};
use crate::protocol::{
    paths, CallToolRequest, ErrorEnvelope, ResourceInfo, SuccessEnvelope, ToolInfo,
    REQUEST_ID_HEADER,
};
use crate::server::registry::match_uri_template;

/// Tools and resources a server advertised at discovery
#[derive(Debug, Clone, Serialize)]
pub struct ServerCatalog {
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub discovered_at: DateTime<Utc>,
}

impl ServerCatalog {
    fn tool(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    fn resource(&self, uri: &str) -> Option<&ResourceInfo> {
        self.resources
            .iter()
            .find(|resource| match_uri_template(&resource.uri, uri).is_some())
    }
}

/// Settings in effect for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallSettings {
    /// Per-attempt timeout
    pub timeout: Duration,
    pub max_attempts: u32,
    pub cache_ttl: Duration,
    pub cacheable: bool,
}

#[derive(Debug, Clone)]
struct Settled {
    outcome: std::result::Result<Value, FailureKind>,
    attempts: u32,
}

/// One upstream call shared by every caller with the same cache key
struct Flight {
    result: watch::Sender<Option<Settled>>,
    /// Callers still waiting on the result
    waiters: AtomicUsize,
    cancel: CancellationToken,
}

impl Flight {
    fn new() -> Self {
        let (result, _) = watch::channel(None);
        Self {
            result,
            waiters: AtomicUsize::new(1),
            cancel: CancellationToken::new(),
        }
    }
}

type InFlight = DashMap<CacheKey, Arc<Flight>>;

/// Detaches a caller from a flight. The last caller to leave an unsettled
/// flight cancels it.
struct WaiterGuard {
    in_flight: Arc<InFlight>,
    key: CacheKey,
    flight: Arc<Flight>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Entry::Occupied(entry) = self.in_flight.entry(self.key.clone()) {
            if Arc::ptr_eq(entry.get(), &self.flight)
                && self.flight.waiters.fetch_sub(1, Ordering::SeqCst) == 1
            {
                tracing::debug!("Last waiter left, cancelling call for {}", self.key);
                self.flight.cancel.cancel();
                entry.remove();
            }
        }
    }
}

/// Client-side invocation pipeline. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InvocationExecutor {
    connections: Arc<ConnectionManager>,
    cache: Arc<ResponseCache>,
    config: Arc<ClientConfig>,
    backoff: BackoffPolicy,
    in_flight: Arc<InFlight>,
    catalogs: Arc<DashMap<String, ServerCatalog>>,
}

impl InvocationExecutor {
    /// Build an executor from a validated config.
    ///
    /// Unreachable servers only recover through health probes. Long-lived
    /// callers should start the probe loop with [`Self::spawn_health_monitor`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connections = Arc::new(ConnectionManager::new(&config)?);
        let cache = Arc::new(ResponseCache::new(config.cache.capacity));
        Ok(Self::with_parts(config, connections, cache))
    }

    /// Build around an existing connection manager and cache
    pub fn with_parts(
        config: ClientConfig,
        connections: Arc<ConnectionManager>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            backoff: BackoffPolicy::from_defaults(&config.defaults),
            connections,
            cache,
            config: Arc::new(config),
            in_flight: Arc::new(DashMap::new()),
            catalogs: Arc::new(DashMap::new()),
        }
    }

    /// Start periodic probing of unreachable servers until `cancel` fires
    pub fn spawn_health_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.connections.clone().spawn_health_monitor(cancel)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Invoke a tool on a server
    pub async fn invoke(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
        options: InvokeOptions,
    ) -> InvocationResult {
        self.execute(InvocationRequest::tool(server_id, tool, arguments), options)
            .await
    }

    /// Read a resource through the same pipeline as tool calls
    pub async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
        options: InvokeOptions,
    ) -> InvocationResult {
        self.execute(InvocationRequest::resource(server_id, uri), options)
            .await
    }

    /// Drop the cached result of a tool call. Returns whether one existed.
    pub fn invalidate(&self, server_id: &str, tool: &str, arguments: &Value) -> bool {
        self.cache
            .invalidate(&CacheKey::for_tool(server_id, tool, arguments))
    }

    /// Resolve timeout, attempts, TTL and cacheability.
    ///
    /// Call option, then per-tool override, then per-server override, then
    /// global default. Cacheability comes from the per-tool override, else
    /// from what the server advertised; unknown tools are never cached.
    pub fn settings_for(
        &self,
        server_id: &str,
        target: &Target,
        options: &InvokeOptions,
    ) -> CallSettings {
        let defaults = &self.config.defaults;
        let server: Option<&ServerSettings> = self.config.servers.get(server_id);
        let tool: Option<&ToolOverrides> = match target {
            Target::Tool { name, .. } => server.and_then(|s| s.tools.get(name)),
            Target::Resource { .. } => None,
        };

        let timeout = options
            .timeout
            .or(tool.and_then(|t| t.timeout))
            .or(server.and_then(|s| s.timeout))
            .unwrap_or(defaults.timeout);
        let max_attempts = tool
            .and_then(|t| t.max_attempts)
            .or(server.and_then(|s| s.max_attempts))
            .unwrap_or(defaults.max_attempts)
            .max(1);
        let cache_ttl = tool
            .and_then(|t| t.cache_ttl)
            .or(server.and_then(|s| s.cache_ttl))
            .unwrap_or(defaults.cache_ttl);

        let advertised = self.catalogs.get(server_id).and_then(|catalog| match target {
            Target::Tool { name, .. } => catalog.tool(name).map(|t| t.cacheable),
            Target::Resource { uri } => catalog.resource(uri).map(|r| r.cacheable),
        });
        let cacheable = tool
            .and_then(|t| t.cacheable)
            .or(advertised)
            .unwrap_or(false);

        CallSettings {
            timeout,
            max_attempts,
            cache_ttl,
            cacheable,
        }
    }

    async fn execute(&self, request: InvocationRequest, options: InvokeOptions) -> InvocationResult {
        let span = tracing::info_span!(
            "invoke",
            server = %request.server_id,
            target = %request.target.label(),
            request_id = %request.id
        );
        self.execute_inner(request, options).instrument(span).await
    }

    async fn execute_inner(
        &self,
        request: InvocationRequest,
        options: InvokeOptions,
    ) -> InvocationResult {
        let settings = self.settings_for(&request.server_id, &request.target, &options);
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);

        if !settings.cacheable || options.bypass_cache {
            let attempts = AtomicU32::new(0);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FailureKind::Cancelled),
                outcome = self.run_attempts(&request, &settings, &attempts) => outcome,
            };

            if let (true, Ok(value)) = (settings.cacheable, &outcome) {
                let key = self.cache_key(&request);
                self.cache.set(key, value.clone(), settings.cache_ttl);
            }
            return InvocationResult::new(&request, outcome, attempts.load(Ordering::SeqCst), false);
        }

        let key = self.cache_key(&request);
        if let Some(value) = self.cache.get(&key) {
            tracing::debug!("Cache hit for {}", key);
            return InvocationResult::new(&request, Ok(value), 0, true);
        }

        let (flight, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let flight = entry.get().clone();
                flight.waiters.fetch_add(1, Ordering::SeqCst);
                (flight, false)
            }
            Entry::Vacant(entry) => {
                // A flight may have settled between the lookup above and
                // taking this entry.
                if let Some(value) = self.cache.get(&key) {
                    drop(entry);
                    tracing::debug!("Cache hit for {}", key);
                    return InvocationResult::new(&request, Ok(value), 0, true);
                }
                let flight = Arc::new(Flight::new());
                entry.insert(flight.clone());
                (flight, true)
            }
        };

        let guard = WaiterGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
            flight: flight.clone(),
        };

        if leader {
            self.spawn_flight(request.clone(), settings, key, flight.clone());
        } else {
            tracing::debug!("Joined in-flight call for {}", key);
        }

        let mut rx = flight.result.subscribe();
        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            settled = rx.wait_for(Option::is_some) => settled.ok().and_then(|s| s.clone()),
        };
        drop(guard);

        match settled {
            Some(settled) => InvocationResult::new(&request, settled.outcome, settled.attempts, false),
            None => InvocationResult::new(&request, Err(FailureKind::Cancelled), 0, false),
        }
    }

    fn cache_key(&self, request: &InvocationRequest) -> CacheKey {
        match &request.target {
            Target::Tool { name, arguments } => {
                CacheKey::for_tool(&request.server_id, name, arguments)
            }
            Target::Resource { uri } => CacheKey::for_resource(&request.server_id, uri),
        }
    }

    /// Run the upstream call for a flight in its own task, so that one caller
    /// going away does not cancel it for the rest.
    fn spawn_flight(
        &self,
        request: InvocationRequest,
        settings: CallSettings,
        key: CacheKey,
        flight: Arc<Flight>,
    ) {
        let executor = self.clone();
        let span = tracing::debug_span!("flight", key = %key);

        tokio::spawn(
            async move {
                let attempts = AtomicU32::new(0);
                let outcome = tokio::select! {
                    biased;
                    _ = flight.cancel.cancelled() => Err(FailureKind::Cancelled),
                    outcome = executor.run_attempts(&request, &settings, &attempts) => outcome,
                };

                // Publish to the cache before leaving the in-flight map so a
                // newcomer either joins this flight or hits the cache.
                if let Ok(value) = &outcome {
                    executor
                        .cache
                        .set(key.clone(), value.clone(), settings.cache_ttl);
                }
                executor
                    .in_flight
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));
                flight.result.send_replace(Some(Settled {
                    outcome,
                    attempts: attempts.load(Ordering::SeqCst),
                }));
            }
            .instrument(span),
        );
    }

    /// Attempt loop: acquire, send, classify, back off, retry
    async fn run_attempts(
        &self,
        request: &InvocationRequest,
        settings: &CallSettings,
        attempts: &AtomicU32,
    ) -> std::result::Result<Value, FailureKind> {
        let mut attempt = 0;

        loop {
            let connection = self.connections.acquire(&request.server_id).await?;
            attempt += 1;
            attempts.store(attempt, Ordering::SeqCst);

            let kind = match self
                .send(&connection, request.id, &request.target, settings.timeout)
                .await
            {
                Ok(value) => {
                    self.connections.release(connection, Outcome::Success);
                    return Ok(value);
                }
                Err(kind) => kind,
            };

            let delay = if attempt < settings.max_attempts {
                self.backoff.delay(&kind, attempt)
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    self.connections.release(connection, Outcome::Neutral);
                    tracing::warn!(
                        "Attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        settings.max_attempts,
                        kind,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let unhealthy = categorize(&kind).is_some_and(ErrorCategory::counts_against_health);
                    let outcome = if unhealthy {
                        Outcome::Failure
                    } else {
                        Outcome::Success
                    };
                    self.connections.release(connection, outcome);

                    if is_retryable(&kind) {
                        tracing::warn!("Giving up after {} attempts: {}", attempt, kind);
                        return Err(FailureKind::ServiceUnavailable {
                            attempts: attempt,
                            last: Box::new(kind),
                        });
                    }
                    return Err(kind);
                }
            }
        }
    }

    /// One HTTP exchange on a leased connection
    async fn send(
        &self,
        connection: &Connection,
        request_id: RequestId,
        target: &Target,
        timeout: Duration,
    ) -> std::result::Result<Value, FailureKind> {
        let builder = match target {
            Target::Tool { name, arguments } => connection
                .client()
                .post(connection.url(paths::CALL_TOOL))
                .json(&CallToolRequest {
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
            Target::Resource { uri } => connection.client().get(format!(
                "{}?uri={}",
                connection.url(paths::READ_RESOURCE),
                urlencoding::encode(uri)
            )),
        };

        let response = builder
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e, timeout))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(&e, timeout))?;

        if status.is_success() {
            let envelope: SuccessEnvelope<Value> =
                serde_json::from_slice(&body).map_err(|e| FailureKind::ServerError {
                    status: status.as_u16(),
                    message: format!("malformed response: {}", e),
                })?;
            Ok(envelope.result)
        } else {
            let error = serde_json::from_slice::<ErrorEnvelope>(&body)
                .ok()
                .map(|envelope| envelope.error);
            Err(classify_response(status, error, retry_after))
        }
    }

    /// Fetch and store a server's tool and resource listings
    pub async fn discover(&self, server_id: &str) -> std::result::Result<ServerCatalog, FailureKind> {
        let connection = self.connections.acquire(server_id).await.map_err(|kind| {
            tracing::warn!("Discovery on {} skipped: {}", server_id, kind);
            kind
        })?;
        let timeout = self
            .config
            .servers
            .get(server_id)
            .and_then(|s| s.timeout)
            .unwrap_or(self.config.defaults.timeout);

        let listing = async {
            let tools: Vec<ToolInfo> = fetch_json(&connection, paths::LIST_TOOLS, timeout).await?;
            let resources: Vec<ResourceInfo> =
                fetch_json(&connection, paths::LIST_RESOURCES, timeout).await?;
            Ok::<_, FailureKind>((tools, resources))
        }
        .await;

        match listing {
            Ok((tools, resources)) => {
                self.connections.release(connection, Outcome::Success);
                let catalog = ServerCatalog {
                    tools,
                    resources,
                    discovered_at: Utc::now(),
                };
                tracing::info!(
                    "Discovered {} tools and {} resources on {}",
                    catalog.tools.len(),
                    catalog.resources.len(),
                    server_id
                );
                self.catalogs.insert(server_id.to_string(), catalog.clone());
                Ok(catalog)
            }
            Err(kind) => {
                let unhealthy = categorize(&kind).is_some_and(ErrorCategory::counts_against_health);
                let outcome = if unhealthy {
                    Outcome::Failure
                } else {
                    Outcome::Success
                };
                self.connections.release(connection, outcome);
                tracing::warn!("Discovery on {} failed: {}", server_id, kind);
                Err(kind)
            }
        }
    }

    /// Discover every configured server
    pub async fn discover_all(
        &self,
    ) -> Vec<(String, std::result::Result<ServerCatalog, FailureKind>)> {
        let ids: Vec<String> = self.connections.server_ids().map(str::to_string).collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.discover(&id).await;
            results.push((id, result));
        }
        results
    }

    pub fn catalog(&self, server_id: &str) -> Option<ServerCatalog> {
        self.catalogs.get(server_id).map(|c| c.clone())
    }

    /// First server, in id order, whose catalog lists `tool`
    pub fn find_tool(&self, tool: &str) -> Option<String> {
        let mut servers: Vec<String> = self
            .catalogs
            .iter()
            .filter(|entry| entry.value().tool(tool).is_some())
            .map(|entry| entry.key().clone())
            .collect();
        servers.sort();
        servers.into_iter().next()
    }

    /// First server, in id order, with a resource pattern matching `uri`
    pub fn find_resource(&self, uri: &str) -> Option<String> {
        let mut servers: Vec<String> = self
            .catalogs
            .iter()
            .filter(|entry| entry.value().resource(uri).is_some())
            .map(|entry| entry.key().clone())
            .collect();
        servers.sort();
        servers.into_iter().next()
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    connection: &Connection,
    path: &str,
    timeout: Duration,
) -> std::result::Result<T, FailureKind> {
    let response = connection
        .client()
        .get(connection.url(path))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_transport(&e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_response(status, None, None));
    }

    response.json().await.map_err(|e| {
        if e.is_timeout() {
            FailureKind::Timeout { timeout }
        } else {
            FailureKind::ServerError {
                status: status.as_u16(),
                message: format!("malformed listing: {}", e),
            }
        }
    })
}
