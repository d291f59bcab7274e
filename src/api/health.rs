//! `GET /health/ready`, `GET /health/live` (spec §6). The orchestration core
//! has no required external dependency of its own (the AI gateway and
//! artifact store are injected collaborators, §1), so both probes report
//! readiness from in-process state rather than pinging anything over the
//! network.
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
}

pub(crate) async fn ready() -> Json<HealthReport> {
    Json(HealthReport { status: "ready" })
}

pub(crate) async fn live() -> Json<HealthReport> {
    Json(HealthReport { status: "live" })
}
