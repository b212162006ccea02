//! Connection management
//!
//! One bounded pool and one health record per configured server. The server
//! map is fixed at construction; each endpoint record has its own lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, HealthConfig};
use crate::error::{ConfigError, FailureKind, Result};
use crate::protocol::paths;

/// Health classification of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unknown,
    Healthy,
    Degraded,
    Unreachable,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Healthy => "healthy",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// What a released connection reports about the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Leaves the health record untouched
    Neutral,
}

/// Health record of one server
#[derive(Debug)]
struct ServerEndpoint {
    state: ConnectionState,
    consecutive_failures: u32,
    failure_threshold: u32,
    last_success: Option<DateTime<Utc>>,
    probe_interval: Duration,
    max_probe_interval: Duration,
    /// Wait before the next probe while unreachable
    probe_delay: Duration,
    next_probe_at: Option<Instant>,
}

impl ServerEndpoint {
    fn new(failure_threshold: u32, health: &HealthConfig) -> Self {
        Self {
            state: ConnectionState::Unknown,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            last_success: None,
            probe_interval: health.probe_interval,
            max_probe_interval: health.max_probe_interval.max(health.probe_interval),
            probe_delay: health.probe_interval,
            next_probe_at: None,
        }
    }

    /// Apply an invocation outcome. Ignored while unreachable; only a probe
    /// brings the server back.
    fn record(&mut self, outcome: Outcome, now: Instant) {
        if self.state == ConnectionState::Unreachable {
            return;
        }

        match outcome {
            Outcome::Neutral => {}
            Outcome::Success => self.mark_healthy(),
            Outcome::Failure => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = ConnectionState::Unreachable;
                    self.probe_delay = self.probe_interval;
                    self.next_probe_at = Some(now + self.probe_delay);
                } else {
                    self.state = ConnectionState::Degraded;
                }
            }
        }
    }

    fn probe_succeeded(&mut self) {
        self.mark_healthy();
    }

    fn probe_failed(&mut self, now: Instant) {
        if self.state == ConnectionState::Unreachable {
            self.probe_delay = (self.probe_delay * 2).min(self.max_probe_interval);
            self.next_probe_at = Some(now + self.probe_delay);
        } else {
            self.record(Outcome::Failure, now);
        }
    }

    fn probe_due(&self, now: Instant) -> bool {
        self.state == ConnectionState::Unreachable
            && self.next_probe_at.is_some_and(|at| at <= now)
    }

    fn mark_healthy(&mut self) {
        self.state = ConnectionState::Healthy;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.probe_delay = self.probe_interval;
        self.next_probe_at = None;
    }
}

/// Serializable view of one server's pool and health
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub base_url: String,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    /// Requests that could start right now
    pub available_slots: usize,
    pub next_probe_in_ms: Option<u64>,
}

struct EndpointSlot {
    id: String,
    base_url: String,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    endpoint: Mutex<ServerEndpoint>,
}

impl EndpointSlot {
    fn state(&self) -> ConnectionState {
        self.endpoint.lock().state
    }

    fn record(&self, outcome: Outcome) {
        let mut endpoint = self.endpoint.lock();
        let before = endpoint.state;
        endpoint.record(outcome, Instant::now());
        log_transition(&self.id, before, endpoint.state, endpoint.consecutive_failures);
    }

    fn snapshot(&self) -> EndpointSnapshot {
        let endpoint = self.endpoint.lock();
        let now = Instant::now();
        EndpointSnapshot {
            id: self.id.clone(),
            base_url: self.base_url.clone(),
            state: endpoint.state,
            consecutive_failures: endpoint.consecutive_failures,
            last_success: endpoint.last_success,
            available_slots: self.permits.available_permits(),
            next_probe_in_ms: endpoint
                .next_probe_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

fn log_transition(id: &str, before: ConnectionState, after: ConnectionState, failures: u32) {
    if before == after {
        return;
    }
    match after {
        ConnectionState::Unreachable => tracing::warn!(
            "Server {} is unreachable after {} consecutive failures",
            id,
            failures
        ),
        ConnectionState::Degraded => tracing::warn!("Server {} is degraded (was {})", id, before),
        _ => tracing::info!("Server {} is {} (was {})", id, after, before),
    }
}

/// A leased slot in a server's pool. Dropping it returns the slot without
/// touching the health record.
pub struct Connection {
    slot: Arc<EndpointSlot>,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    pub fn server_id(&self) -> &str {
        &self.slot.id
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.slot.client
    }

    /// Absolute URL for a server path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.slot.base_url, path)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server_id", &self.slot.id)
            .finish()
    }
}

/// Per-server pools and health state machines
pub struct ConnectionManager {
    slots: BTreeMap<String, Arc<EndpointSlot>>,
    health: HealthConfig,
}

impl ConnectionManager {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut slots = BTreeMap::new();

        for (id, server) in &config.servers {
            let url = reqwest::Url::parse(&server.base_url).map_err(|e| {
                ConfigError::InvalidConfig {
                    message: format!("server '{}' has invalid base_url: {}", id, e),
                }
            })?;

            let client = reqwest::Client::builder()
                .pool_max_idle_per_host(config.pool.max_idle)
                .build()?;

            let threshold = server
                .failure_threshold
                .unwrap_or(config.defaults.failure_threshold);

            slots.insert(
                id.clone(),
                Arc::new(EndpointSlot {
                    id: id.clone(),
                    base_url: url.as_str().trim_end_matches('/').to_string(),
                    client,
                    permits: Arc::new(Semaphore::new(config.pool.max_in_flight.max(1))),
                    endpoint: Mutex::new(ServerEndpoint::new(threshold, &config.health)),
                }),
            );
        }

        Ok(Self {
            slots,
            health: config.health.clone(),
        })
    }

    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    fn slot(&self, server_id: &str) -> std::result::Result<&Arc<EndpointSlot>, FailureKind> {
        self.slots
            .get(server_id)
            .ok_or_else(|| FailureKind::NotFound {
                message: format!("unknown server '{}'", server_id),
            })
    }

    /// Lease a slot in the server's pool.
    ///
    /// Fails at once when the server is unreachable. Waits while the pool is
    /// full, then checks the state again.
    pub async fn acquire(&self, server_id: &str) -> std::result::Result<Connection, FailureKind> {
        let slot = self.slot(server_id)?;
        let unreachable = || FailureKind::Unreachable {
            server_id: server_id.to_string(),
        };

        if slot.state() == ConnectionState::Unreachable {
            return Err(unreachable());
        }

        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| unreachable())?;

        if slot.state() == ConnectionState::Unreachable {
            return Err(unreachable());
        }

        Ok(Connection {
            slot: slot.clone(),
            _permit: permit,
        })
    }

    /// Return a lease and feed its outcome into the server's health record
    pub fn release(&self, connection: Connection, outcome: Outcome) {
        connection.slot.record(outcome);
    }

    pub fn state(&self, server_id: &str) -> Option<ConnectionState> {
        self.slots.get(server_id).map(|slot| slot.state())
    }

    pub fn endpoint(&self, server_id: &str) -> Option<EndpointSnapshot> {
        self.slots.get(server_id).map(|slot| slot.snapshot())
    }

    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        self.slots.values().map(|slot| slot.snapshot()).collect()
    }

    /// Probe `GET /health` now and record the result
    pub async fn probe(&self, server_id: &str) -> std::result::Result<ConnectionState, FailureKind> {
        let slot = self.slot(server_id)?;
        let url = format!("{}{}", slot.base_url, paths::HEALTH);

        let healthy = match slot
            .client
            .get(&url)
            .timeout(self.health.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe of {} failed: {}", server_id, e);
                false
            }
        };

        let mut endpoint = slot.endpoint.lock();
        let before = endpoint.state;
        if healthy {
            endpoint.probe_succeeded();
        } else {
            endpoint.probe_failed(Instant::now());
            if before == ConnectionState::Unreachable {
                tracing::debug!(
                    "Server {} still unreachable, next probe in {:?}",
                    server_id,
                    endpoint.probe_delay
                );
            }
        }
        log_transition(server_id, before, endpoint.state, endpoint.consecutive_failures);
        Ok(endpoint.state)
    }

    /// Health check every configured server once
    pub async fn connect_all(&self) -> Vec<(String, ConnectionState)> {
        let mut states = Vec::with_capacity(self.slots.len());
        for id in self.slots.keys() {
            match self.probe(id).await {
                Ok(state) => {
                    tracing::info!("Connected to {}: {}", id, state);
                    states.push((id.clone(), state));
                }
                Err(e) => tracing::warn!("Could not check {}: {}", id, e),
            }
        }
        states
    }

    /// Servers whose next probe is due
    fn due_probes(&self) -> Vec<String> {
        let now = Instant::now();
        self.slots
            .values()
            .filter(|slot| slot.endpoint.lock().probe_due(now))
            .map(|slot| slot.id.clone())
            .collect()
    }

    /// Probe unreachable servers on every tick until `cancel` fires
    pub fn spawn_health_monitor(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.health.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for id in self.due_probes() {
                            let _ = self.probe(&id).await;
                        }
                    }
                }
            }
            tracing::debug!("Health monitor stopped");
        })
    }
}
