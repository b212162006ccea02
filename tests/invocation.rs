//! End-to-end tests for the invocation pipeline
//!
//! Each test binds tool servers to 127.0.0.1:0 and drives them through an
//! `InvocationExecutor`, counting upstream calls with atomics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use mcp_relay::client::{ConnectionState, InvocationExecutor, InvokeOptions, Outcome};
use mcp_relay::config::{ClientConfig, ServerConfig};
use mcp_relay::error::{FailureKind, HandlerError};
use mcp_relay::server::registry::{ResourceDescriptor, ResourceRequest};
use mcp_relay::server::{http, FieldType, InputSchema, RequestRouter, ToolDescriptor, ToolRegistry};

/// Serve `app` on an ephemeral port and return its base URL
async fn spawn_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_registry(registry: ToolRegistry) -> String {
    let router = RequestRouter::new(Arc::new(registry), &ServerConfig::default());
    spawn_app(http::app(Arc::new(router))).await
}

/// A weather server whose `get_weather` handler counts its calls
async fn weather_server(calls: Arc<AtomicUsize>, delay: Duration) -> String {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            ToolDescriptor::new("get_weather", "Current weather for a city")
                .with_schema(InputSchema::new().required("city", FieldType::String, "City"))
                .cacheable(true),
            Arc::new(move |args: Map<String, Value>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    Ok::<_, HandlerError>(json!({"city": args["city"], "temp_c": 14}))
                }
            }),
        )
        .unwrap();
    registry
        .register_resource(
            ResourceDescriptor::new("forecast://{city}", "Forecast").cacheable(true),
            Arc::new(|req: ResourceRequest| async move {
                Ok::<_, HandlerError>(format!("rain in {}", req.params["city"]))
            }),
        )
        .unwrap();
    spawn_registry(registry).await
}

/// Upstream that answers 503 for its first `failures` calls
#[derive(Default)]
struct Flaky {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

async fn flaky_call(State(flaky): State<Arc<Flaky>>) -> Response {
    flaky.calls.fetch_add(1, Ordering::SeqCst);
    let failing = flaky
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if failing {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"code": "unavailable", "message": "warming up"}})),
        )
            .into_response()
    } else {
        Json(json!({"result": {"ok": true}})).into_response()
    }
}

async fn flaky_server(failures: usize) -> (String, Arc<Flaky>) {
    let flaky = Arc::new(Flaky {
        calls: AtomicUsize::new(0),
        failures_left: AtomicUsize::new(failures),
    });
    let app = Router::new()
        .route("/tools/call", post(flaky_call))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .with_state(flaky.clone());
    (spawn_app(app).await, flaky)
}

fn client_config(server_id: &str, base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::with_servers([(server_id, base_url)]);
    config.defaults.backoff_base = Some(Duration::from_millis(10));
    config.defaults.jitter = false;
    config
}

fn london() -> Value {
    json!({"city": "London"})
}

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_goes_upstream_then_hits_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::ZERO).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();

        // Discovery tells the executor get_weather is cacheable
        executor.discover("weather-server").await.unwrap();
        assert_eq!(executor.find_tool("get_weather"), Some("weather-server".into()));

        let first = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        assert!(!first.from_cache);
        assert_eq!(first.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        assert!(second.from_cache);
        assert_eq!(second.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(first.into_result().unwrap(), second.into_result().unwrap());
    }

    #[tokio::test]
    async fn test_find_resource_matches_templates() {
        let url = weather_server(Arc::new(AtomicUsize::new(0)), Duration::ZERO).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();
        assert_eq!(executor.find_resource("forecast://London"), None);

        executor.discover("weather-server").await.unwrap();
        assert_eq!(
            executor.find_resource("forecast://London"),
            Some("weather-server".into())
        );
        assert_eq!(executor.find_resource("notes://all"), None);
    }

    #[tokio::test]
    async fn test_failed_discovery_leaves_calls_uncached() {
        // Answers calls but has no listing routes
        let (url, flaky) = flaky_server(0).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();

        let discovered = executor.discover("weather-server").await;
        assert!(matches!(discovered, Err(FailureKind::NotFound { .. })));
        assert!(executor.catalog("weather-server").is_none());

        for _ in 0..2 {
            let result = executor
                .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                .await;
            assert!(!result.from_cache);
            assert_eq!(result.into_result().unwrap(), json!({"ok": true}));
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::ZERO).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.cache_ttl = Duration::from_millis(200);
        let executor = InvocationExecutor::new(config).unwrap();
        executor.discover("weather-server").await.unwrap();

        executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let again = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;

        assert!(!again.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tools_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::ZERO).await;
        // No discovery and no override: cacheability is unknown
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();

        for _ in 0..2 {
            let result = executor
                .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bypass_cache_goes_upstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::ZERO).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();
        executor.discover("weather-server").await.unwrap();

        executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        let fresh = executor
            .invoke(
                "weather-server",
                "get_weather",
                london(),
                InvokeOptions::new().bypass_cache(),
            )
            .await;

        assert!(!fresh.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resource_read_is_cached() {
        let url = weather_server(Arc::new(AtomicUsize::new(0)), Duration::ZERO).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();
        executor.discover("weather-server").await.unwrap();

        let first = executor
            .read_resource("weather-server", "forecast://paris", InvokeOptions::new())
            .await;
        let contents = first.into_result().unwrap();
        assert_eq!(contents["content"], "rain in paris");
        assert_eq!(contents["mimeType"], "text/plain");

        let second = executor
            .read_resource("weather-server", "forecast://paris", InvokeOptions::new())
            .await;
        assert!(second.from_cache);
    }
}

mod single_flight_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_upstream_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::from_millis(200)).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();
        executor.discover("weather-server").await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    executor
                        .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let expected = json!({"city": "London", "temp_c": 14});
        for result in &results {
            assert_eq!(result.outcome.as_ref().unwrap(), &expected);
        }

        let mut ids: Vec<_> = results.iter().map(|r| r.request_id.to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_cancelling_one_waiter_keeps_the_call_for_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::from_millis(300)).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();
        executor.discover("weather-server").await.unwrap();

        let cancel = CancellationToken::new();
        let cancelled = {
            let executor = executor.clone();
            let options = InvokeOptions::new().with_cancel(cancel.clone());
            tokio::spawn(async move {
                executor
                    .invoke("weather-server", "get_weather", london(), options)
                    .await
            })
        };
        let patient = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let cancelled = cancelled.await.unwrap();
        assert_eq!(cancelled.failure(), Some(&FailureKind::Cancelled));

        let patient = patient.await.unwrap();
        assert_eq!(patient.into_result().unwrap()["temp_c"], 14);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_waiter_leaving_releases_the_connection() {
        let url = weather_server(Arc::new(AtomicUsize::new(0)), Duration::from_secs(5)).await;
        let mut config = client_config("weather-server", &url);
        config.pool.max_in_flight = 2;
        let executor = InvocationExecutor::new(config).unwrap();
        executor.discover("weather-server").await.unwrap();

        let cancel = CancellationToken::new();
        let call = {
            let executor = executor.clone();
            let options = InvokeOptions::new().with_cancel(cancel.clone());
            tokio::spawn(async move {
                executor
                    .invoke("weather-server", "get_weather", london(), options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let endpoint = executor.connections().endpoint("weather-server").unwrap();
        assert_eq!(endpoint.available_slots, 1);

        cancel.cancel();
        assert_eq!(call.await.unwrap().failure(), Some(&FailureKind::Cancelled));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let endpoint = executor.connections().endpoint("weather-server").unwrap();
        assert_eq!(endpoint.available_slots, 2);
        assert_eq!(endpoint.state, ConnectionState::Healthy);
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_errors_then_success() {
        let (url, flaky) = flaky_server(3).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.max_attempts = 5;
        config.defaults.backoff_base = Some(Duration::from_millis(100));
        let executor = InvocationExecutor::new(config).unwrap();

        let started = Instant::now();
        let result = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;

        assert!(started.elapsed() >= Duration::from_millis(700));
        assert_eq!(result.attempts, 4);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.into_result().unwrap(), json!({"ok": true}));
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Healthy)
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (url, flaky) = flaky_server(10).await;
        let executor = InvocationExecutor::new(client_config("weather-server", &url)).unwrap();

        let result = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        match result.failure() {
            Some(FailureKind::ServiceUnavailable { attempts, last }) => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**last, FailureKind::ServerError { status: 503, .. }));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Degraded)
        );
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls.clone(), Duration::ZERO).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.max_attempts = 5;
        let executor = InvocationExecutor::new(config).unwrap();

        let result = executor
            .invoke("weather-server", "get_weather", json!({}), InvokeOptions::new())
            .await;

        assert_eq!(result.attempts, 1);
        assert!(matches!(result.failure(), Some(FailureKind::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The server answered, so it counts as healthy
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Healthy)
        );
    }

    #[tokio::test]
    async fn test_handler_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        let counter = calls.clone();
        registry
            .register(
                ToolDescriptor::new("remove_task", "Remove a task"),
                Arc::new(move |_args: Map<String, Value>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<Value, _>(HandlerError::Failed("Task not found".into())) }
                }),
            )
            .unwrap();
        let url = spawn_registry(registry).await;
        let executor = InvocationExecutor::new(client_config("tasks", &url)).unwrap();

        let result = executor
            .invoke("tasks", "remove_task", json!({"id": "t1"}), InvokeOptions::new())
            .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.failure(),
            Some(&FailureKind::HandlerFailure {
                message: "Task not found".into()
            })
        );
    }

    #[tokio::test]
    async fn test_retry_after_is_respected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        let counter = calls.clone();
        registry
            .register(
                ToolDescriptor::new("search_web", "Web search"),
                Arc::new(move |_args: Map<String, Value>| {
                    let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            Err(HandlerError::RateLimited {
                                retry_after: Some(Duration::from_secs(1)),
                            })
                        } else {
                            Ok(json!(["result"]))
                        }
                    }
                }),
            )
            .unwrap();
        let url = spawn_registry(registry).await;
        let executor = InvocationExecutor::new(client_config("search", &url)).unwrap();

        let started = Instant::now();
        let result = executor
            .invoke("search", "search_web", json!({"query": "rust"}), InvokeOptions::new())
            .await;

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(result.attempts, 2);
        assert_eq!(result.into_result().unwrap(), json!(["result"]));
    }

    #[tokio::test]
    async fn test_per_call_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = weather_server(calls, Duration::from_secs(2)).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.max_attempts = 1;
        let executor = InvocationExecutor::new(config).unwrap();

        let started = Instant::now();
        let result = executor
            .invoke(
                "weather-server",
                "get_weather",
                london(),
                InvokeOptions::new().with_timeout(Duration::from_millis(100)),
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        match result.failure() {
            Some(FailureKind::ServiceUnavailable { last, .. }) => {
                assert_eq!(
                    **last,
                    FailureKind::Timeout {
                        timeout: Duration::from_millis(100)
                    }
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = client_config("gone", &url);
        config.defaults.max_attempts = 2;
        let executor = InvocationExecutor::new(config).unwrap();

        let result = executor
            .invoke("gone", "get_weather", london(), InvokeOptions::new())
            .await;

        assert_eq!(result.attempts, 2);
        match result.failure() {
            Some(FailureKind::ServiceUnavailable { last, .. }) => {
                assert!(matches!(**last, FailureKind::Network { .. }));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_during_backoff_stops_retries() {
        let (url, flaky) = flaky_server(usize::MAX).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.backoff_base = Some(Duration::from_millis(300));
        config.defaults.max_attempts = 5;
        config.defaults.failure_threshold = 1;
        let executor = InvocationExecutor::new(config).unwrap();

        let call = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                    .await
            })
        };

        // While the first attempt backs off, another caller's failure trips
        // the threshold
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        let connections = executor.connections();
        let connection = connections.acquire("weather-server").await.unwrap();
        connections.release(connection, Outcome::Failure);
        assert_eq!(
            connections.state("weather-server"),
            Some(ConnectionState::Unreachable)
        );

        let result = call.await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.failure(),
            Some(&FailureKind::Unreachable {
                server_id: "weather-server".into()
            })
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_cancellation_returns_permit() {
        let url = weather_server(Arc::new(AtomicUsize::new(0)), Duration::from_secs(5)).await;
        let mut config = client_config("weather-server", &url);
        config.pool.max_in_flight = 1;
        let executor = InvocationExecutor::new(config).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = executor
            .invoke(
                "weather-server",
                "get_weather",
                london(),
                InvokeOptions::new().with_cancel(cancel),
            )
            .await;
        assert_eq!(result.failure(), Some(&FailureKind::Cancelled));

        let endpoint = executor.connections().endpoint("weather-server").unwrap();
        assert_eq!(endpoint.available_slots, 1);
        assert_eq!(endpoint.state, ConnectionState::Unknown);
    }
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_then_probe_recovery() {
        let (url, flaky) = flaky_server(3).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.max_attempts = 1;
        config.defaults.failure_threshold = 3;
        let executor = InvocationExecutor::new(config).unwrap();

        for _ in 0..3 {
            let result = executor
                .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
                .await;
            assert!(!result.is_ok());
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Unreachable)
        );

        let blocked = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        assert_eq!(blocked.attempts, 0);
        assert_eq!(
            blocked.failure(),
            Some(&FailureKind::Unreachable {
                server_id: "weather-server".into()
            })
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

        let state = executor.connections().probe("weather-server").await.unwrap();
        assert_eq!(state, ConnectionState::Healthy);

        let recovered = executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        assert_eq!(recovered.into_result().unwrap(), json!({"ok": true}));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_health_monitor_probes_unreachable_servers() {
        let (url, _flaky) = flaky_server(1).await;
        let mut config = client_config("weather-server", &url);
        config.defaults.max_attempts = 1;
        config.defaults.failure_threshold = 1;
        config.health.probe_interval = Duration::from_millis(50);
        config.health.tick = Duration::from_millis(20);
        let executor = InvocationExecutor::new(config).unwrap();

        executor
            .invoke("weather-server", "get_weather", london(), InvokeOptions::new())
            .await;
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Unreachable)
        );

        let cancel = CancellationToken::new();
        let monitor = executor.spawn_health_monitor(cancel.clone());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            executor.connections().state("weather-server"),
            Some(ConnectionState::Healthy)
        );

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_all() {
        let (url, _flaky) = flaky_server(0).await;
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = ClientConfig::with_servers([("up", url.as_str()), ("down", dead.as_str())]);
        config.health.probe_timeout = Duration::from_millis(500);
        let executor = InvocationExecutor::new(config).unwrap();

        let states = executor.connections().connect_all().await;
        assert_eq!(
            states,
            vec![
                ("down".to_string(), ConnectionState::Degraded),
                ("up".to_string(), ConnectionState::Healthy),
            ]
        );

        let snapshots = executor.connections().endpoints();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().find(|s| s.id == "up").unwrap().last_success.is_some());
    }
}
