use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    auth::require_basic_auth, batch_handlers, desktop_handlers, handlers, metrics, pages,
    reconstruction_handlers, trial_handlers, ws, AppState,
};

pub fn create_router(state: AppState) -> Router {
    let static_dir = state.settings.frontend_dir().join("static");

    let public = Router::new()
        // Pages
        .route("/", get(pages::landing))
        .route("/login", get(pages::login_page))
        .route("/dashboard", get(pages::dashboard_page))
        // Unauthenticated API
        .route("/api/login", post(handlers::login))
        .route("/api/health", get(handlers::health))
        .route(
            "/api/reconstruct/{id}/image/{*path}",
            get(reconstruction_handlers::reconstruction_image),
        )
        .route("/ws", get(ws::websocket_handler))
        .route("/metrics", get(metrics::metrics_handler));

    let protected = Router::new()
        // Overview
        .route("/api/status", get(handlers::status))
        .route("/api/containers", get(handlers::containers))
        .route("/api/system", get(handlers::system))
        // Trials
        .route("/api/trial/start/{id}", post(trial_handlers::start_trial))
        .route("/api/trial/stop/{id}", post(trial_handlers::stop_trial))
        .route("/api/trial/{id}", delete(trial_handlers::remove_trial))
        .route(
            "/api/trial/{id}/data",
            get(trial_handlers::trial_data).delete(trial_handlers::delete_data),
        )
        .route("/api/trials/completed", get(trial_handlers::completed_trials))
        .route("/api/logs/{id}", get(trial_handlers::trial_logs))
        .route("/api/download/{id}", get(trial_handlers::download_trial))
        // Batches
        .route("/api/batch/start", post(batch_handlers::start_batch))
        .route("/api/batch/status", get(batch_handlers::batch_status))
        .route("/api/batch/cancel", post(batch_handlers::cancel_batch))
        .route("/api/batch/stop", post(batch_handlers::stop_batch))
        // Reconstruction
        .route(
            "/api/reconstruct/{id}",
            post(reconstruction_handlers::start_reconstruction),
        )
        .route(
            "/api/reconstruct/{id}/status",
            get(reconstruction_handlers::reconstruction_status),
        )
        .route(
            "/api/reconstruct/{id}/results",
            get(reconstruction_handlers::reconstruction_results),
        )
        .route(
            "/api/reconstruct/{id}/logs",
            get(reconstruction_handlers::reconstruction_logs),
        )
        .route(
            "/api/reconstruct/{id}/images",
            get(reconstruction_handlers::reconstruction_images),
        )
        .route(
            "/api/reconstruct/{id}/generate-heatmap",
            post(reconstruction_handlers::generate_heatmap),
        )
        // Host remote desktop
        .route("/api/host/vnc/start", post(desktop_handlers::start_desktop))
        .route("/api/host/vnc/stop", post(desktop_handlers::stop_desktop))
        .route("/api/host/vnc/status", get(desktop_handlers::desktop_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
}
