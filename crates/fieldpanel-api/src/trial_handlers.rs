//! Single-trial endpoints: container lifecycle and mission data.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use fieldpanel_core::{
    archive_file_name, archive_trial, delete_trial_data, list_completed_trials, preview_samples,
    CompletedTrial, FieldPanelError, SamplePreview, TrialId,
};
use fieldpanel_runtime::StartedTrial;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::event_bus::PanelEvent;
use crate::metrics::{TRIALS_STARTED_TOTAL, TRIAL_START_FAILURES_TOTAL};
use crate::state::AppState;

#[derive(Serialize)]
pub struct TrialStartResponse {
    pub success: bool,
    pub message: String,
    pub result: StartedTrial,
}

#[derive(Serialize)]
pub struct TrialActionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    pub lines: usize,
}

fn default_log_lines() -> usize {
    100
}

#[derive(Serialize)]
pub struct LogsResponse {
    pub trial_id: TrialId,
    pub logs: String,
}

#[derive(Deserialize)]
pub struct DataQuery {
    #[serde(default = "default_field")]
    pub field: String,
}

fn default_field() -> String {
    "radial".to_string()
}

#[derive(Serialize)]
pub struct DeleteDataResponse {
    pub success: bool,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub message: String,
}

/// Container-level "not found" becomes the trial-level message.
fn trial_error(id: TrialId, err: FieldPanelError) -> ApiError {
    if err.is_not_found() {
        ApiError::NotFound(format!("Trial {id} not found"))
    } else {
        ApiError::from(err)
    }
}

pub async fn start_trial(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<TrialStartResponse>> {
    let simulation = state.simulation()?;
    let result = match simulation.start_trial(id).await {
        Ok(result) => result,
        Err(e) => {
            TRIAL_START_FAILURES_TOTAL.inc();
            error!(trial = %id, "Failed to start trial: {}", e);
            return Err(e.into());
        }
    };
    TRIALS_STARTED_TOTAL.inc();

    state.events.publish(PanelEvent::TrialStarted {
        trial_id: id,
        batch_status: None,
    });
    Ok(Json(TrialStartResponse {
        success: true,
        message: format!("Trial {id} started"),
        result,
    }))
}

pub async fn stop_trial(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<TrialActionResponse>> {
    state
        .simulation()?
        .stop_trial(id)
        .await
        .map_err(|e| trial_error(id, e))?;

    state.events.publish(PanelEvent::TrialStopped { trial_id: id });
    Ok(Json(TrialActionResponse {
        success: true,
        message: format!("Trial {id} stopped"),
    }))
}

pub async fn remove_trial(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<TrialActionResponse>> {
    state
        .simulation()?
        .remove_trial(id)
        .await
        .map_err(|e| trial_error(id, e))?;

    state.events.publish(PanelEvent::TrialRemoved { trial_id: id });
    Ok(Json(TrialActionResponse {
        success: true,
        message: format!("Trial {id} removed"),
    }))
}

pub async fn trial_logs(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state
        .simulation()?
        .trial_logs(id, query.lines)
        .await
        .map_err(|e| trial_error(id, e))?;
    Ok(Json(LogsResponse { trial_id: id, logs }))
}

pub async fn completed_trials(State(state): State<AppState>) -> ApiResult<Json<Vec<CompletedTrial>>> {
    let layout = state.layout().clone();
    let trials = tokio::task::spawn_blocking(move || list_completed_trials(&layout))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(trials))
}

pub async fn download_trial(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Response> {
    let layout = state.layout().clone();
    let bytes = tokio::task::spawn_blocking(move || -> fieldpanel_core::Result<Vec<u8>> {
        let archive = tempfile::NamedTempFile::new()?;
        archive_trial(&layout, id, archive.path())?;
        Ok(std::fs::read(archive.path())?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(trial = %id, size = bytes.len(), "Serving trial archive");
    let filename = archive_file_name(id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}

pub async fn trial_data(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
    Query(query): Query<DataQuery>,
) -> ApiResult<Json<SamplePreview>> {
    let layout = state.layout().clone();
    let preview = tokio::task::spawn_blocking(move || preview_samples(&layout, id, &query.field))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(preview))
}

/// Remove mission data and reconstruction results, stopping any
/// reconstruction still reading them.
pub async fn delete_data(
    State(state): State<AppState>,
    Path(id): Path<TrialId>,
) -> ApiResult<Json<DeleteDataResponse>> {
    let discarded = state.reconstruction.discard(id).await?;

    let layout = state.layout().clone();
    let mut report = tokio::task::spawn_blocking(move || delete_trial_data(&layout, id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if discarded {
        report
            .deleted
            .push("running reconstruction process".to_string());
    }

    if report.is_empty() {
        return Err(ApiError::NotFound(format!("No data found for trial {id}")));
    }

    let success = report.success();
    Ok(Json(DeleteDataResponse {
        success,
        message: if success {
            format!("Deleted trial {id}")
        } else {
            format!("Partially deleted trial {id}")
        },
        deleted: report.deleted,
        errors: report.errors,
    }))
}
