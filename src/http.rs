use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::provider::ConferenceProvider;
use crate::simulator::{self, DelayRange};

/// Shared handler state: the provider client, delay policy and the
/// shutdown token pending completions hang off.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ConferenceProvider>,
    pub delay: DelayRange,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn ConferenceProvider>,
        delay: DelayRange,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            delay,
            shutdown,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AsyncData {
    pub name: String,
}

/// Static result of the simulated operation.
pub async fn get_async_data() -> Json<AsyncData> {
    Json(AsyncData {
        name: "Winston Klein".to_string(),
    })
}

/// Body of an initiate request, accepted as JSON or form-encoded.
#[derive(Debug, Default, Deserialize)]
pub struct InitiateRequest {
    #[serde(rename = "conferenceName", default)]
    pub conference_name: Option<String>,
}

impl<S> FromRequest<S> for InitiateRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let is_json = content_type.starts_with("application/json");
        let is_form = content_type.starts_with("application/x-www-form-urlencoded");
        if !is_json && !is_form {
            // No parseable body means no conferenceName.
            return Ok(InitiateRequest::default());
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(InitiateRequest::default());
        }

        if is_json {
            serde_json::from_slice(&bytes).map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to parse the request body as JSON: {}", e),
                )
                    .into_response()
            })
        } else {
            let mut form_req = Request::new(Body::from(bytes));
            *form_req.method_mut() = Method::POST;
            form_req.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            let Form(body) = Form::<InitiateRequest>::from_request(form_req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(body)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub result: &'static str,
    #[serde(rename = "conferenceName")]
    pub conference_name: String,
}

/// Accept a simulated async task and schedule the conference completion.
pub async fn initiate_async(
    State(state): State<AppState>,
    body: InitiateRequest,
) -> Json<InitiateResponse> {
    let conference_name = body.conference_name.unwrap_or_default();
    let delay_ms = state.delay.draw_ms();

    simulator::schedule_completion(
        Arc::clone(&state.provider),
        &conference_name,
        Duration::from_millis(delay_ms),
        &state.shutdown,
    );

    info!(conference = %conference_name, "conference friendly name");
    info!(delay_ms = delay_ms, "random time delay for async operation");

    Json(InitiateResponse {
        result: "success",
        conference_name,
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/studioGetAsyncData", get(get_async_data))
        .route("/studioInitiateAsync", post(initiate_async))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listener` until `cancel` fires.
pub fn spawn_http_server(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let router = build_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "HTTP server listening");
    }

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .ok();
    })
}
