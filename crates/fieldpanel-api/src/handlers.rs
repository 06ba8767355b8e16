use axum::{extract::State, Json};
use chrono::Local;
use fieldpanel_runtime::{ContainerSummary, SystemStats};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::verify_credentials;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Local wall-clock time without offset, the format the dashboard displays.
pub fn timestamp() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub username: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub containers: Vec<ContainerSummary>,
    pub system: SystemStats,
    pub timestamp: String,
    pub is_production: bool,
    pub host_pc_connected: bool,
}

/// Periodic dashboard payload, also pushed over the WebSocket.
#[derive(Serialize)]
pub struct Snapshot {
    pub containers: Vec<ContainerSummary>,
    pub system: SystemStats,
    pub timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "online".to_string(),
        timestamp: timestamp(),
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    if !verify_credentials(&state.settings.auth, &request.username, &request.password) {
        warn!(user = %request.username, "Failed login");
        return Err(ApiError::InvalidCredentials("Invalid credentials".to_string()));
    }
    info!(user = %request.username, "Login");
    Ok(Json(LoginResponse {
        success: true,
        username: request.username,
    }))
}

/// Trial containers, or an empty list when no container host is attached.
pub async fn container_list(state: &AppState) -> Vec<ContainerSummary> {
    let Ok(simulation) = state.simulation() else {
        return Vec::new();
    };
    match simulation.list_containers().await {
        Ok(containers) => containers,
        Err(e) => {
            warn!("Error listing containers: {}", e);
            Vec::new()
        }
    }
}

pub async fn snapshot(state: &AppState) -> Snapshot {
    let (containers, system) = tokio::join!(container_list(state), state.system.snapshot());
    Snapshot {
        containers,
        system,
        timestamp: timestamp(),
    }
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = snapshot(&state).await;
    Json(StatusResponse {
        containers: snapshot.containers,
        system: snapshot.system,
        timestamp: snapshot.timestamp,
        is_production: state.settings.runtime.production,
        host_pc_connected: state.host_connected(),
    })
}

pub async fn containers(State(state): State<AppState>) -> Json<Vec<ContainerSummary>> {
    Json(container_list(&state).await)
}

pub async fn system(State(state): State<AppState>) -> Json<SystemStats> {
    Json(state.system.snapshot().await)
}
