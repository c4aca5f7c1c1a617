use anyhow::{Context, Result};
use dine_ingress_line::{IngressConfig, run};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = dine_telemetry::install("ingress-line", env!("CARGO_PKG_VERSION"))?;

    let config = match IngressConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "ingress-line configuration invalid");
            return Err(err).context("loading ingress-line configuration");
        }
    };

    run(config).await
}
