pub(crate) mod generate;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod status;
pub(crate) mod ws;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config()
        .allowed_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/profile/generate", post(generate::submit))
        .route("/profile/{history_id}/compute-documentary", post(generate::compute_documentary))
        .route("/profile/{history_id}/generate-video", post(generate::generate_video))
        .route("/profile/status/{job_id}", get(status::get))
        .route("/ws/tasks/{job_id}", get(ws::handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
