//! Telemetry bootstrap shared by dine services.
//!
//! Installs the tracing subscriber (text or JSON, filtered by `RUST_LOG`),
//! optionally wires an OTLP span exporter, and names the metrics the ingress
//! path records.

mod config;
mod metrics;
mod tracing_init;

pub use config::{TelemetryConfig, TelemetryProtocol};
pub use metrics::{
    EventOutcome, ReplyOutcome, RequestOutcome, record_event, record_reply, record_request,
};
pub use tracing_init::{DEFAULT_DIRECTIVES, TelemetryGuard, init_telemetry};

/// Installs telemetry for `service_name` using environment configuration.
pub fn install(service_name: &str, service_version: &str) -> anyhow::Result<TelemetryGuard> {
    init_telemetry(TelemetryConfig::from_env(service_name, service_version))
}
