use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{self, BatchStarted, BatchStatus};
use crate::error::ApiResult;
use crate::event_bus::PanelEvent;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BatchRequest {
    pub start_trial: u32,
    pub end_trial: u32,
    /// Falls back to `batch.default_concurrent`.
    pub concurrent: Option<usize>,
}

#[derive(Serialize)]
pub struct BatchCancelResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct BatchStopResponse {
    pub success: bool,
    pub stopped: Vec<String>,
}

pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchStarted>> {
    let concurrent = request
        .concurrent
        .unwrap_or(state.settings.batch.default_concurrent);
    let started = batch::launch(&state, request.start_trial, request.end_trial, concurrent).await?;
    Ok(Json(started))
}

pub async fn batch_status(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(state.batch.status())
}

/// Stop scheduling; containers already running are left alone.
pub async fn cancel_batch(State(state): State<AppState>) -> Json<BatchCancelResponse> {
    state.batch.stop();
    info!("Batch cancelled");
    state.events.publish(PanelEvent::BatchCancelled);
    Json(BatchCancelResponse {
        success: true,
        message: "Batch cancelled - running containers will continue".to_string(),
    })
}

pub async fn stop_batch(State(state): State<AppState>) -> ApiResult<Json<BatchStopResponse>> {
    state.batch.stop();
    let stopped = state.simulation()?.stop_all().await?;
    info!(count = stopped.len(), "Stopped all trial containers");
    state.events.publish(PanelEvent::BatchStopped {
        containers: stopped.clone(),
    });
    Ok(Json(BatchStopResponse {
        success: true,
        stopped,
    }))
}
