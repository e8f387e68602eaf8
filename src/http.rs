use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::System;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use url::Url;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::logging::logger;
use crate::session::{SessionError, StreamRequest};

const MAX_SOURCE_URL_LENGTH: usize = 2048;

type ApiResponse = Result<Response, ApiError>;

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn extract_client_ip(headers: &HeaderMap, remote: Option<&SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let request_id = extract_request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| &info.0);
    let client_ip = extract_client_ip(request.headers(), remote);
    let started_at = Instant::now();

    logger().info(
        "request.received",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "path": path,
            "clientIp": client_ip,
        }),
    );

    let mut response = next.run(request).await;
    let duration_ms = started_at.elapsed().as_secs_f64() * 1000.0;

    logger().info(
        "request.completed",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "path": path,
            "statusCode": response.status().as_u16(),
            "durationMs": duration_ms,
            "clientIp": client_ip,
        }),
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static("x-request-id"), value);
    }

    response
}

fn json_response<T>(status: StatusCode, payload: T) -> Response
where
    T: Serialize,
{
    (status, Json(payload)).into_response()
}

#[derive(Debug)]
struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        ApiError(error)
    }
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let message = self.0.to_string();
        if status.is_server_error() {
            logger().error(
                "request.failed",
                json!({
                    "kind": self.0.kind(),
                    "error": message,
                    "statusCode": status.as_u16(),
                }),
            );
        }
        json_response(status, ErrorResponse { error: &message })
    }
}

pub fn build_router(state: AppState) -> Router {
    let workspaces = state.pipeline.workspaces();
    let static_files = ServeDir::new(workspaces.root());
    let mount_prefix = workspaces.mount_prefix().to_string();

    Router::new()
        .route("/", get(root))
        .route("/stream", get(stream))
        .route("/stream/", get(stream))
        .route("/internal/status", get(internal_status))
        .nest_service(&mount_prefix, static_files)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(log_requests))
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    logger().info("server.listening", json!({ "address": addr.to_string() }));

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn root() -> Response {
    json_response(StatusCode::OK, json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
}

async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResponse {
    let url = validate_source_url(query.url.as_deref())?;
    let resolution = parse_resolution(
        query.resolution.as_deref(),
        state.config.default_resolution,
    )?;

    let published = state
        .pipeline
        .spawn(StreamRequest { url, resolution })
        .await?;

    Ok(Redirect::temporary(&published.location).into_response())
}

async fn internal_status(State(state): State<AppState>) -> Response {
    let mut system = System::new();
    system.refresh_memory();

    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "sessions": state.gate_snapshot(),
            "transcodeMode": state.config.transcoder.mode,
            "metrics": {
                "uptimeSeconds": state.uptime_seconds(),
                "memory": {
                    "usedBytes": system.used_memory(),
                    "totalBytes": system.total_memory(),
                },
            },
        }),
    )
}

fn validate_source_url(raw: Option<&str>) -> Result<String, SessionError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(SessionError::BadRequest("Query parameter 'url' is required".into()));
    }
    if raw.len() > MAX_SOURCE_URL_LENGTH {
        return Err(SessionError::BadRequest("Source URL is too long".into()));
    }
    let parsed = Url::parse(raw)
        .map_err(|_| SessionError::BadRequest("Source URL is not a valid URL".into()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SessionError::BadRequest("Source URL must use http or https".into()));
    }
    if parsed.host_str().is_none() {
        return Err(SessionError::BadRequest("Source URL must include a host".into()));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(SessionError::BadRequest(
            "Source URL must not embed credentials".into(),
        ));
    }
    Ok(parsed.to_string())
}

fn parse_resolution(raw: Option<&str>, default: u32) -> Result<u32, SessionError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|height| *height > 0)
            .ok_or_else(|| {
                SessionError::BadRequest(
                    "Query parameter 'resolution' must be a positive integer".into(),
                )
            }),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            logger().warn(
                "server.signal_unavailable",
                json!({ "signal": "ctrl_c", "error": err.to_string() }),
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                logger().warn(
                    "server.signal_unavailable",
                    json!({ "signal": "sigterm", "error": err.to_string() }),
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    logger().info("server.shutdown", json!({}));
}
