//! Prometheus metric definitions for the orchestrator.
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// Metrics collector for the orchestration HTTP surface and job lifecycle.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub plans_submitted: Counter,
    pub plans_completed: Counter,
    pub plans_failed: Counter,
    pub documentary_requests: Counter,
    pub video_requests: Counter,
    pub submission_cooldown_rejections: Counter,
    pub stale_jobs_swept: Counter,
    pub ws_connections_opened: Counter,

    pub http_request_duration: Histogram,

    pub active_jobs: Gauge,
    pub registry_size: Gauge,
}

impl Metrics {
    /// # Errors
    /// Returns an error if a metric name collides with one already
    /// registered in `registry`.
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            plans_submitted: register_counter_with_registry!(
                "orchestrator_plans_submitted_total",
                "Total number of plans submitted via POST /profile/generate",
                registry
            )?,
            plans_completed: register_counter_with_registry!(
                "orchestrator_plans_completed_total",
                "Total number of plans that reached PLAN_COMPLETED",
                registry
            )?,
            plans_failed: register_counter_with_registry!(
                "orchestrator_plans_failed_total",
                "Total number of plans that reached PLAN_FAILED",
                registry
            )?,
            documentary_requests: register_counter_with_registry!(
                "orchestrator_documentary_requests_total",
                "Total number of compute-documentary requests accepted",
                registry
            )?,
            video_requests: register_counter_with_registry!(
                "orchestrator_video_requests_total",
                "Total number of generate-video requests accepted",
                registry
            )?,
            submission_cooldown_rejections: register_counter_with_registry!(
                "orchestrator_submission_cooldown_rejections_total",
                "Requests rejected because the per-history submission cooldown was active",
                registry
            )?,
            stale_jobs_swept: register_counter_with_registry!(
                "orchestrator_stale_jobs_swept_total",
                "Total number of terminal plans evicted by the registry sweeper",
                registry
            )?,
            ws_connections_opened: register_counter_with_registry!(
                "orchestrator_ws_connections_opened_total",
                "Total number of WebSocket progress subscriptions opened",
                registry
            )?,
            http_request_duration: register_histogram_with_registry!(
                "orchestrator_http_request_duration_seconds",
                "Duration of HTTP handler execution",
                registry
            )?,
            active_jobs: register_gauge_with_registry!(
                "orchestrator_active_jobs",
                "Number of plans currently executing",
                registry
            )?,
            registry_size: register_gauge_with_registry!(
                "orchestrator_registry_size",
                "Number of plans currently held in the job registry",
                registry
            )?,
        })
    }
}
