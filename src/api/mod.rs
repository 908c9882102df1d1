//! HTTP callback API
//!
//! Appliances POST their heartbeat to `/heartbeat` and get back `{}`,
//! `{"master-ip": ..}` or `{"action": "shutdown"}`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::{OpenApi, ToSchema};

use crate::cluster::{AutoscaleHandler, ExecutionDeadline};
use crate::config::Config;
use crate::error::AutoscaleError;
use crate::platform::MemoryPlatform;
use crate::settings;
use crate::types::{HeartbeatPayload, HeartbeatResponse, RequestInfo};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler error mapped onto an HTTP status.
#[derive(Debug)]
pub struct ApiError(AutoscaleError);

impl From<AutoscaleError> for ApiError {
    fn from(e: AutoscaleError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AutoscaleError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AutoscaleError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("Request failed: {}", self.0);
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(heartbeat, reset_election, health),
    components(schemas(RequestInfo, HeartbeatPayload, ResetResponse, ErrorBody)),
    info(title = "Autoscale Coordinator API", description = "Heartbeat sync callbacks for a firewall autoscale cluster")
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct ApiServer {
    handler: Arc<AutoscaleHandler>,
}

impl ApiServer {
    pub fn new(handler: Arc<AutoscaleHandler>) -> Self {
        Self { handler }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/heartbeat", post(heartbeat))
            .route("/election/reset", post(reset_election))
            .route("/health", get(health))
            .route("/api-docs/openapi.json", get(openapi_spec))
            .layer(
                ServiceBuilder::new().layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                ),
            )
            .with_state(self.handler.clone())
    }
}

#[utoipa::path(
    post,
    path = "/heartbeat",
    request_body = RequestInfo,
    responses(
        (status = 200, description = "Heartbeat handled", body = HeartbeatPayload),
        (status = 400, description = "Heartbeat interval out of range", body = ErrorBody),
        (status = 403, description = "Calling instance is not part of the cluster", body = ErrorBody),
        (status = 500, description = "Instance could not bootstrap", body = ErrorBody)
    )
)]
async fn heartbeat(
    State(handler): State<Arc<AutoscaleHandler>>,
    Json(request): Json<RequestInfo>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let settings = handler.settings();
    let deadline = ExecutionDeadline::from_budget(
        settings.execution_budget(),
        settings.execution_safety_margin(),
    )?;
    let response = handler.handle(&request, deadline).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/election/reset",
    responses((status = 200, description = "Master record removed", body = ResetResponse))
)]
async fn reset_election(State(handler): State<Arc<AutoscaleHandler>>) -> Json<ResetResponse> {
    Json(ResetResponse {
        success: handler.reset_master_election().await,
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = String))
)]
async fn health() -> &'static str {
    "OK"
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build a handler over the in-memory platform seeded from `config`, with
/// deployment settings saved.
pub async fn build_handler(config: &Config) -> Result<Arc<AutoscaleHandler>, AutoscaleError> {
    config.validate()?;
    let platform = Arc::new(MemoryPlatform::from_config(config));
    let handler = AutoscaleHandler::new(platform, config.autoscale.clone());

    if !handler
        .save_settings(&settings::deployment_settings(&config.autoscale))
        .await
    {
        return Err(AutoscaleError::Settings(
            "Failed to save deployment settings".to_string(),
        ));
    }
    handler.init().await?;
    Ok(Arc::new(handler))
}

/// Serve the callback API until `shutdown` resolves.
pub async fn serve<F>(config: &Config, shutdown: F) -> Result<(), AutoscaleError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handler = build_handler(config).await?;
    let app = ApiServer::new(handler).router();

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Autoscale API listening on {}", listener.local_addr()?);
    info!("OpenAPI spec: /api-docs/openapi.json");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped gracefully");
    Ok(())
}

/// Serve until Ctrl+C.
pub async fn run(config: &Config) -> Result<(), AutoscaleError> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    serve(config, async move {
        let _ = rx.recv().await;
        info!("Shutdown signal received");
    })
    .await
}
