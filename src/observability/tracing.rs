use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

const SERVICE_NAME: &str = "profile-journey-orchestrator";

/// Initialize the process-wide tracing subscriber exactly once. When
/// `otel_endpoint` is set an OTLP span exporter is attached alongside the
/// JSON fmt layer; otherwise tracing falls back to JSON logs only.
///
/// # Errors
/// Returns an error if the subscriber or the OTLP exporter fail to build.
pub fn init(otel_endpoint: Option<&str>, sampling_ratio: f64) -> Result<()> {
    TRACING_INIT
        .get_or_try_init(|| {
            let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

            match otel_endpoint {
                Some(endpoint) => {
                    let tracer = init_tracer(endpoint, sampling_ratio)?;
                    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt_layer)
                        .with(otel_layer)
                        .try_init()
                        .map_err(|error| Error::msg(error.to_string()))?;
                    info!(endpoint, "tracing initialized with OTLP export");
                }
                None => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt_layer)
                        .try_init()
                        .map_err(|error| Error::msg(error.to_string()))?;
                    info!("tracing initialized (JSON logs only, no OTEL_EXPORTER_ENDPOINT configured)");
                }
            }

            Ok::<(), Error>(())
        })?;
    Ok(())
}

fn init_tracer(endpoint: &str, sampling_ratio: f64) -> Result<opentelemetry_sdk::trace::SdkTracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Placeholder for tracer shutdown. `opentelemetry` 0.30's global API does
/// not expose a way to retrieve the `SdkTracerProvider` installed by
/// `init_tracer` back out of `global`, so there is nothing to flush here
/// without threading the provider through to the caller; batched spans are
/// exported on their own interval regardless.
pub fn shutdown() {}
