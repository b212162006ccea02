//! MCP Relay
//!
//! Runs a tool server, or calls tools on configured servers through the
//! invocation executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use mcp_relay::client::{InvocationExecutor, InvocationResult, InvokeOptions};
use mcp_relay::config::{ClientConfig, ServerConfig};
use mcp_relay::error::Result;
use mcp_relay::server::builtin::register_builtins;
use mcp_relay::server::{http, RequestRouter, ToolRegistry};

/// MCP Relay
#[derive(Parser)]
#[command(name = "mcp-relay")]
#[command(author, version, about = "MCP Relay - tool server and invocation client")]
struct Cli {
    /// Client config file; defaults to $MCP_RELAY_CONFIG, then ~/.mcp-relay/servers.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool server with the built-in diagnostic tools
    Serve,

    /// Call a tool and print its result as JSON
    Call {
        /// Server id from the client config
        server: String,

        tool: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,

        /// Per-attempt timeout, e.g. "5s" or "500ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Skip the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Read a resource
    Read {
        server: String,

        uri: String,

        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        #[arg(long)]
        no_cache: bool,
    },

    /// List tools and resources of one or all servers
    Tools {
        server: Option<String>,
    },

    /// Health check all servers and print their state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => run_server().await?,
        Commands::Call {
            server,
            tool,
            arguments,
            timeout,
            no_cache,
        } => {
            let arguments: Value = serde_json::from_str(&arguments)?;
            let executor = executor(cli.config)?;
            // Learn which tools the server marks cacheable
            discover_before_call(&executor, &server).await;

            let options = options(timeout, no_cache);
            let result = executor.invoke(&server, &tool, arguments, options).await;
            print_result(result)?;
        }
        Commands::Read {
            server,
            uri,
            timeout,
            no_cache,
        } => {
            let executor = executor(cli.config)?;
            discover_before_call(&executor, &server).await;

            let result = executor
                .read_resource(&server, &uri, options(timeout, no_cache))
                .await;
            print_result(result)?;
        }
        Commands::Tools { server } => {
            let executor = executor(cli.config)?;
            let results = match server {
                Some(id) => {
                    let result = executor.discover(&id).await;
                    vec![(id, result)]
                }
                None => executor.discover_all().await,
            };

            let mut listing = serde_json::Map::new();
            for (id, result) in results {
                let entry = match result {
                    Ok(catalog) => serde_json::to_value(catalog)?,
                    Err(e) => json!({ "error": e.to_string() }),
                };
                listing.insert(id, entry);
            }
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Status => {
            let executor = executor(cli.config)?;
            executor.connections().connect_all().await;
            let endpoints = executor.connections().endpoints();
            println!("{}", serde_json::to_string_pretty(&endpoints)?);
        }
    }

    Ok(())
}

async fn run_server() -> Result<()> {
    let config = ServerConfig::from_env()?;

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry)?;

    let router = Arc::new(RequestRouter::new(Arc::new(registry), &config));
    http::serve(router, &config).await
}

fn executor(path: Option<PathBuf>) -> Result<InvocationExecutor> {
    let config = ClientConfig::load(path.as_deref())?;
    InvocationExecutor::new(config)
}

/// Best-effort discovery; the call still runs, uncached, when it fails
async fn discover_before_call(executor: &InvocationExecutor, server_id: &str) {
    if let Err(e) = executor.discover(server_id).await {
        tracing::debug!("Calling {} without a catalog: {}", server_id, e);
    }
}

/// Options for a one-shot call, cancelled on ctrl-c
fn options(timeout: Option<Duration>, no_cache: bool) -> InvokeOptions {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut options = InvokeOptions::new().with_cancel(cancel);
    if let Some(timeout) = timeout {
        options = options.with_timeout(timeout);
    }
    if no_cache {
        options = options.bypass_cache();
    }
    options
}

fn print_result(result: InvocationResult) -> Result<()> {
    tracing::debug!(
        "Request {} finished in {:?} after {} attempts (cached: {})",
        result.request_id,
        result.latency,
        result.attempts,
        result.from_cache
    );

    match result.into_result() {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
