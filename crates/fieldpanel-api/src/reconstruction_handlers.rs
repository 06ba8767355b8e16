//! Gaussian-process reconstruction endpoints.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use fieldpanel_core::{collect_metrics, list_images, FieldPanelError, MetricRow, ResultImage, TrialId};
use fieldpanel_runtime::{HeatmapOutcome, ReconstructionLogs, ReconstructionStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::event_bus::PanelEvent;
use crate::metrics::RECONSTRUCTIONS_STARTED_TOTAL;
use crate::state::AppState;

/// Selection sent by the dashboard. The script always reconstructs every
/// field, method and kernel, so the values are only logged.
#[derive(Debug, Deserialize)]
pub struct ReconstructionRequest {
    #[serde(default = "all")]
    pub field: String,
    #[serde(default = "all")]
    pub method: String,
    #[serde(default = "all")]
    pub kernel: String,
}

fn all() -> String {
    "all".to_string()
}

impl Default for ReconstructionRequest {
    fn default() -> Self {
        Self {
            field: all(),
            method: all(),
            kernel: all(),
        }
    }
}

#[derive(Serialize)]
pub struct ReconstructionStartResponse {
    pub success: bool,
    pub message: String,
    pub pid: u32,
    pub log_file: String,
}

#[derive(Serialize)]
pub struct ResultsResponse {
    pub trial_id: TrialId,
    pub results: Vec<MetricRow>,
}

#[derive(Serialize)]
pub struct ImagesResponse {
    pub trial_id: TrialId,
    pub images: Vec<ResultImage>,
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(e.to_string())
}

pub async fn start_reconstruction(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
    body: Bytes,
) -> ApiResult<Json<ReconstructionStartResponse>> {
    let request = if body.is_empty() {
        ReconstructionRequest::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!("Ignoring malformed reconstruction request: {}", e);
            ReconstructionRequest::default()
        })
    };
    info!(
        trial = %id,
        field = %request.field,
        method = %request.method,
        kernel = %request.kernel,
        "Reconstruction requested"
    );

    let started = state.reconstruction.start(id).await?;
    RECONSTRUCTIONS_STARTED_TOTAL.inc();
    state
        .events
        .publish(PanelEvent::ReconstructionStarted { trial_id: id });

    Ok(Json(ReconstructionStartResponse {
        success: true,
        message: format!("Reconstruction started for trial {id}"),
        pid: started.pid,
        log_file: started.log_file.display().to_string(),
    }))
}

pub async fn reconstruction_status(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> Json<ReconstructionStatus> {
    Json(state.reconstruction.status(id))
}

pub async fn reconstruction_results(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<ResultsResponse>> {
    let layout = state.layout().clone();
    let results = tokio::task::spawn_blocking(move || collect_metrics(&layout, id))
        .await
        .map_err(join_error)??;
    Ok(Json(ResultsResponse {
        trial_id: id,
        results,
    }))
}

pub async fn reconstruction_logs(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> Json<ReconstructionLogs> {
    Json(state.reconstruction.logs(id))
}

pub async fn reconstruction_images(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<ImagesResponse>> {
    let layout = state.layout().clone();
    let images = tokio::task::spawn_blocking(move || list_images(&layout, id))
        .await
        .map_err(join_error)?;
    Ok(Json(ImagesResponse {
        trial_id: id,
        images,
    }))
}

/// Result plots are embedded in the dashboard without credentials.
pub async fn reconstruction_image(
    State(state): State<AppState>,
    Path((id, image_path)): Path<(TrialId, String)>,
) -> ApiResult<Response> {
    let path = state
        .layout()
        .resolve_result_file(id, &image_path)
        .map_err(|e| match e {
            FieldPanelError::InvalidInput(_) => ApiError::Forbidden("Access denied".to_string()),
            other => ApiError::from(other),
        })?;
    let bytes = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

pub async fn generate_heatmap(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<HeatmapOutcome>> {
    Ok(Json(state.reconstruction.generate_heatmap(id).await?))
}
