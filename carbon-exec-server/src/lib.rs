use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use carbon_exec::{CodeExecutionService, ExecutionRequest, RunOutput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod config;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Code payload cannot be empty.")]
    EmptyPayload,
    #[error(transparent)]
    Execution(#[from] carbon_exec::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ServerError::EmptyPayload => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Execution(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ServerError::Execution(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Execution failed: {}", e),
            ),
            ServerError::ServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RunRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub stdout: String,
    pub stderr: String,
    pub emissions: f64,
    pub energy_kwh: f64,
    pub cpu_energy: f64,
    pub gpu_energy: f64,
    pub duration: f64,
    pub carbon_intensity: Option<f64>,
    pub country: Option<String>,
}

impl From<RunOutput> for RunResponse {
    fn from(output: RunOutput) -> Self {
        let RunOutput { result, emissions } = output;
        Self {
            stdout: result.stdout,
            stderr: result.stderr,
            emissions: emissions.emissions,
            energy_kwh: emissions.energy_kwh,
            cpu_energy: emissions.cpu_energy,
            gpu_energy: emissions.gpu_energy,
            duration: emissions.duration,
            carbon_intensity: emissions.carbon_intensity,
            country: emissions.country,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<CodeExecutionService>,
}

pub fn create_app(service: CodeExecutionService, cors: CorsLayer) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    Router::new()
        .route("/healthz", get(healthcheck))
        .route("/run", post(run_code))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_code(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, ServerError> {
    let request = ExecutionRequest::new(payload.code);
    if request.is_blank() {
        return Err(ServerError::EmptyPayload);
    }

    let output = state.service.execute(request).await?;
    Ok(Json(output.into()))
}
