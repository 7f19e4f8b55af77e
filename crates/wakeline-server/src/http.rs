use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use uuid::Uuid;

use wakeline_observability::{emit_event, ObservabilityEvent, ProcessKind};

use crate::{normalize_path, ProxyState, FORWARDED_BY};

const MAX_FORWARD_BODY_BYTES: usize = 10 * 1024 * 1024;
const HOP_BY_HOP: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
];

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

pub async fn serve(addr: SocketAddr, state: ProxyState) -> anyhow::Result<()> {
    let upstream = state.upstream.clone();
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("forwarding proxy listening on {} -> {}", addr, upstream);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

pub fn app_router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/{*path}", any(forward))
        .layer(middleware::from_fn_with_state(state.clone(), normalize_gate))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn normalize_gate(State(state): State<ProxyState>, request: Request, next: Next) -> Response {
    let Some(canonical) = normalize_path(request.uri().path(), &state.routing_prefixes) else {
        return next.run(request).await;
    };
    let location = match request.uri().query() {
        Some(query) => format!("{canonical}?{query}"),
        None => canonical,
    };
    tracing::info!(
        from = %request.uri().path(),
        to = %location,
        "redirecting duplicated routing prefix"
    );
    Redirect::permanent(&location).into_response()
}

async fn health(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "service": FORWARDED_BY,
        "mode": state.mode.as_str(),
        "upstream": state.upstream.as_ref(),
        "uptimeMs": crate::now_ms().saturating_sub(state.started_at_ms),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn forward(
    State(state): State<ProxyState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_FORWARD_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body could not be read",
                "BODY_UNREADABLE",
                Some(err.to_string()),
            )
        }
    };

    let mut url = format!("{}/{}", state.upstream, path.trim_start_matches('/'));
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let response = state
        .client
        .request(parts.method.clone(), &url)
        .headers(forwarded_headers(&parts.headers))
        .body(body)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            let detail = err.to_string();
            emit_forward(
                Level::WARN,
                &correlation_id,
                parts.method.as_str(),
                "upstream_unreachable",
                Some(&detail),
            );
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream unreachable",
                "UPSTREAM_UNREACHABLE",
                Some(detail),
            );
        }
    };

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            let detail = err.to_string();
            emit_forward(
                Level::WARN,
                &correlation_id,
                parts.method.as_str(),
                "upstream_body_failed",
                Some(&detail),
            );
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream response could not be read",
                "UPSTREAM_BODY_FAILED",
                Some(detail),
            );
        }
    };
    emit_forward(
        Level::DEBUG,
        &correlation_id,
        parts.method.as_str(),
        status.as_str(),
        Some(&url),
    );

    let mut out = Response::new(Body::from(bytes));
    *out.status_mut() = status;
    if let Some(content_type) = content_type {
        out.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    out
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = incoming.clone();
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.insert(
        HeaderName::from_static("x-forwarded-by"),
        HeaderValue::from_static(FORWARDED_BY),
    );
    headers
}

fn error_response(
    status: StatusCode,
    error: &str,
    code: &str,
    detail: Option<String>,
) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: error.to_string(),
            code: Some(code.to_string()),
            detail,
        }),
    )
        .into_response()
}

fn emit_forward(level: Level, correlation_id: &str, method: &str, status: &str, detail: Option<&str>) {
    emit_event(
        level,
        ProcessKind::Proxy,
        ObservabilityEvent {
            event: "proxy.forward",
            component: "proxy",
            correlation_id: Some(correlation_id),
            operation: Some(method),
            status: Some(status),
            detail,
            ..Default::default()
        },
    );
}
