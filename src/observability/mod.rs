pub(crate) mod metrics;
pub(crate) mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;
use crate::config::Config;

/// Process-wide tracing and metrics, initialized once at startup.
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: Arc<Metrics>,
    registry: Arc<Registry>,
}

impl Telemetry {
    /// # Errors
    /// Returns an error if the tracing subscriber or the metrics registry
    /// fail to initialize.
    pub fn new(config: &Config) -> Result<Self> {
        tracing::init(config.otel_exporter_endpoint(), config.otel_sampling_ratio())?;
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { metrics, registry })
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn metrics_arc(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Flush and (best-effort) shut down tracing export. Call once during
    /// graceful process shutdown.
    pub fn shutdown(&self) {
        tracing::shutdown();
    }

    /// Render the process's metrics in the Prometheus text exposition
    /// format for the `/metrics` endpoint.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}
