pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod resource;
pub mod service;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{connect_info::ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common_obs::SpanExt;
use credentials::Credentials;
use service::CredentialValidationService;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "credential-gateway";
const REQUEST_ID_HEADER: &str = "x-request-id";
const TRACE_ID_HEADER: &str = "x-trace-id";

pub struct AppState {
    pub service: CredentialValidationService,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate_credentials", post(validate_credentials))
        .route("/healthcheck", get(healthcheck))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(request_context))
        .with_state(state)
}

async fn validate_credentials(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Response {
    // The rejection text can quote the submitted body, so only its status leaves.
    let Json(credentials) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let status = rejection.status();
            tracing::warn!(
                event = "payload_rejected",
                status = status.as_u16(),
                "credential payload could not be read"
            );
            return status.into_response();
        }
    };

    state.service.validate(&credentials).await.into_response()
}

async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(event = "handler_panic", "request handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        });

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        remote_addr = remote_addr.as_str(),
        request_id = %request_id
    );
    span.with_req(&request_id);

    let start = Instant::now();
    {
        let _guard = span.enter();
        tracing::info!(
            event = "request_start",
            method = %method,
            path = %path,
            remote_addr = remote_addr.as_str(),
            user_agent = user_agent.as_str()
        );
    }

    let mut response = next.run(req).instrument(span.clone()).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    {
        let _guard = span.enter();
        tracing::info!(
            event = "request_end",
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            remote_addr = remote_addr.as_str()
        );
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    // Only present when a subscriber is recording the request span.
    if let Some(value) = span
        .trace_id()
        .and_then(|trace_id| HeaderValue::from_str(&trace_id).ok())
    {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }

    response
}
