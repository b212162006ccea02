//! HTTP surface of the tool server
//!
//! Thin axum layer over `RequestRouter`: JSON in, success or error envelope
//! out.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::error::{Result, RouterError};
use crate::protocol::{
    paths, CallToolRequest, ErrorEnvelope, HealthStatus, ReadResourceQuery, SuccessEnvelope,
    REQUEST_ID_HEADER,
};
use crate::server::router::RequestRouter;

/// Build the axum application for a router
pub fn app(router: Arc<RequestRouter>) -> Router {
    Router::new()
        .route(paths::CALL_TOOL, post(call_tool))
        .route(paths::LIST_TOOLS, get(list_tools))
        .route(paths::LIST_RESOURCES, get(list_resources))
        .route(paths::READ_RESOURCE, get(read_resource))
        .route(paths::HEALTH, get(health))
        .with_state(router)
}

/// Serve until ctrl-c
pub async fn serve(router: Arc<RequestRouter>, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        "Serving {} tools on http://{}",
        router.registry().len(),
        listener.local_addr()?
    );

    axum::serve(listener, app(router))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn call_tool(
    State(router): State<Arc<RequestRouter>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CallToolRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(&RouterError::MalformedRequest {
                message: rejection.body_text(),
            })
        }
    };

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let span = tracing::info_span!("tool_call", tool = %request.name, request_id = %request_id);

    match router
        .call_tool(&request.name, request.arguments)
        .instrument(span)
        .await
    {
        Ok(result) => Json(SuccessEnvelope { result }).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn list_tools(State(router): State<Arc<RequestRouter>>) -> Response {
    Json(router.list_tools()).into_response()
}

async fn list_resources(State(router): State<Arc<RequestRouter>>) -> Response {
    Json(router.list_resources()).into_response()
}

async fn read_resource(
    State(router): State<Arc<RequestRouter>>,
    query: std::result::Result<Query<ReadResourceQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return error_response(&RouterError::MalformedRequest {
                message: rejection.body_text(),
            })
        }
    };

    match router.read_resource(&query.uri).await {
        Ok(contents) => Json(SuccessEnvelope { result: contents }).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

fn error_response(err: &RouterError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(ErrorEnvelope::new(err.code(), err.to_string()))).into_response();

    if let RouterError::RateLimited {
        retry_after: Some(retry_after),
    } = err
    {
        let seconds = retry_after.as_secs().max(1);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    }

    response
}
