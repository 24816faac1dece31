//! Logging and optional OpenTelemetry tracing.
//!
//! - Console output, plain text or JSON (`LOG_FORMAT`)
//! - OTLP export to collectors like Jaeger or Tempo when enabled
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Log filter directives | `info` |
//! | `LOG_FORMAT` | `text` or `json` | `text` |
//! | `OTEL_ENABLED` | Enable OpenTelemetry tracing | `false` |
//! | `OTEL_ENDPOINT` | OTLP gRPC endpoint | `http://localhost:4317` |
//! | `OTEL_SERVICE_NAME` | Service name in traces | `db-status-service` |
//! | `OTEL_SAMPLING_RATIO` | Trace sampling ratio (0.0-1.0) | `1.0` |

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat, OtelConfig};

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Keeps the OpenTelemetry provider alive for the lifetime of the process.
pub struct TelemetryGuard {
    _provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self._provider.is_some() {
            // Shutdown is handled automatically by TracerProvider drop
            tracing::info!("Shutting down OpenTelemetry tracer provider");
        }
    }
}

/// Install the global tracing subscriber.
///
/// Hold on to the returned guard until the process exits.
pub fn init_telemetry(logging: &LogConfig, otel: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = if otel.enabled {
        Some(init_otel_tracer(otel)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("db-status-service"))
    });

    let json = logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if otel.enabled {
        tracing::info!(
            endpoint = %otel.endpoint,
            service_name = %otel.service_name,
            sampling_ratio = %otel.sampling_ratio,
            "OpenTelemetry tracing initialized"
        );
    } else {
        tracing::info!(format = ?logging.format, "Tracing initialized (OpenTelemetry disabled)");
    }

    Ok(TelemetryGuard {
        _provider: provider,
    })
}

fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Initialize the OpenTelemetry tracer with OTLP exporter.
fn init_otel_tracer(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    use opentelemetry::KeyValue;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ]))
        .build();

    Ok(provider)
}
