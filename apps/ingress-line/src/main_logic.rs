use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::serve;
use dine_core::platforms::line::LineReplySender;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::IngressConfig;
use crate::dispatch::Dispatcher;
use crate::http::build_router;

/// Slack on top of the reply timeout before in-flight replies are abandoned.
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// Wires the reply client and dispatcher, serves until ctrl-c, then waits for
/// acknowledged events to finish replying.
pub async fn run(config: IngressConfig) -> Result<()> {
    let http = reqwest::Client::builder().build()?;
    let sender = LineReplySender::new(
        http,
        config.credentials.channel_access_token.clone(),
        &config.api_base,
        config.reply_timeout,
    )?;
    info!(endpoint = sender.endpoint(), "line reply client ready");

    let dispatcher = Dispatcher::new(Arc::new(sender), config.follow_greeting.as_str());
    let router = build_router(&config, dispatcher.clone());

    let listener = TcpListener::bind(config.addr).await?;
    info!(
        addr = %config.addr,
        path = %config.webhook_path,
        "ingress-line listening"
    );

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    let abandoned = dispatcher.drain(config.reply_timeout + DRAIN_MARGIN).await;
    if abandoned > 0 {
        warn!(abandoned, "ingress-line stopped with replies still pending");
    } else {
        info!("ingress-line stopped");
    }
    Ok(())
}
