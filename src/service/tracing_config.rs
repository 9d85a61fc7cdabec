use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::{
    runtime,
    trace::{BatchConfigBuilder, RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::config::LogConfig;
use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn resource() -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ],
        SCHEMA_URL,
    )
}

// Construct Tracer for OpenTelemetryLayer
fn init_tracer() -> AppResult<Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .build(),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    1.0,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource()),
        )
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .install_batch(runtime::Tokio)
        .map_err(|e| AppError::TracingSetup(format!("otlp tracer: {e}")))
}

/// Maps `-v` occurrences to a default filter directive, used when
/// `RUST_LOG` is not set.
pub fn level_directive(verbose: u8) -> &'static str {
    match verbose {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Keeps the file writer and the otlp exporter alive, flushing both on drop.
pub struct TracingGuard {
    otlp_enabled: bool,
    _worker_guard: Option<WorkerGuard>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if self.otlp_enabled {
            opentelemetry::global::shutdown_tracer_provider();
            tracing::info!("shutdown otel tracer provider");
        }
    }
}

/// Console-only subscriber for tests and ad-hoc runs. Safe to call more than
/// once, later calls are no-ops.
pub fn setup_local_tracing() -> AppResult<()> {
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter("debug"))
        .try_init();
    Ok(())
}

/// Installs the daemon subscriber: stdout, an optional hourly rolling file
/// and an optional otlp span exporter. Must run inside the tokio runtime
/// when otlp export is enabled.
pub fn setup_tracing(log_config: &LogConfig, default_directive: &str) -> AppResult<TracingGuard> {
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer.clone())
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(true);

    let (file_layer, worker_guard) = match &log_config.file_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::hourly(dir, "mailroute.log");
            let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(worker_guard))
        }
        None => (None, None),
    };

    let otel_layer = if log_config.otlp_enabled {
        Some(OpenTelemetryLayer::new(init_tracer()?))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(otel_layer)
        .with(env_filter(default_directive))
        .try_init()
        .map_err(|e| AppError::TracingSetup(e.to_string()))?;

    Ok(TracingGuard {
        otlp_enabled: log_config.otlp_enabled,
        _worker_guard: worker_guard,
    })
}
