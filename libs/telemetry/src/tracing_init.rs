use std::sync::OnceLock;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{HasExportConfig, SpanExporter};
use opentelemetry_sdk::{
    Resource, propagation::TraceContextPropagator, trace::SdkTracerProvider,
};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{TelemetryConfig, TelemetryProtocol};

/// Used when `RUST_LOG` is unset: service logs at info, HTTP plumbing only
/// when it warns.
pub const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,hyper_util=warn,h2=warn,reqwest=warn,rustls=warn";

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Keeps the span exporter alive; dropping it flushes buffered spans.
///
/// Hold it in `main` until the server and its background work have stopped,
/// so spans from replies finished during shutdown still reach the collector.
#[must_use = "dropping the guard stops span export"]
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("span exporter shutdown failed: {err}");
            }
        }
    }
}

/// Installs the global subscriber. Only the first call does anything; later
/// calls return an inert guard.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<TelemetryGuard> {
    if INSTALLED.set(()).is_err() {
        return Ok(TelemetryGuard::default());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let fmt_layer = if cfg.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let provider = if cfg.exporter_enabled() {
        Some(build_provider(&cfg)?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(
            provider
                .as_ref()
                .map(|provider| OpenTelemetryLayer::new(provider.tracer(cfg.service_name.clone()))),
        )
        .try_init()
        .context("installing the tracing subscriber")?;

    if let Some(provider) = &provider {
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());
    }

    tracing::info!(
        service = %cfg.service_name,
        version = %cfg.service_version,
        environment = %cfg.environment,
        otlp = provider.is_some(),
        "telemetry installed"
    );
    Ok(TelemetryGuard { provider })
}

fn build_provider(cfg: &TelemetryConfig) -> Result<SdkTracerProvider> {
    let exporter = match cfg.protocol {
        TelemetryProtocol::Grpc => {
            let mut builder = SpanExporter::builder().with_tonic();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()
        }
        TelemetryProtocol::HttpProtobuf => {
            let mut builder = SpanExporter::builder().with_http();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()
        }
    }
    .with_context(|| format!("building OTLP span exporter for {}", cfg.endpoint))?;

    let resource = Resource::builder_empty()
        .with_service_name(cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", cfg.service_version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}
