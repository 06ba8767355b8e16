use axum::{extract::State, Json};
use fieldpanel_runtime::{DesktopOutcome, DesktopStatus};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn start_desktop(State(state): State<AppState>) -> ApiResult<Json<DesktopOutcome>> {
    Ok(Json(state.desktop.start().await?))
}

pub async fn stop_desktop(State(state): State<AppState>) -> ApiResult<Json<DesktopOutcome>> {
    Ok(Json(state.desktop.stop().await?))
}

pub async fn desktop_status(State(state): State<AppState>) -> Json<DesktopStatus> {
    Json(state.desktop.status().await)
}
