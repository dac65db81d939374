//! `tern serve`

use anyhow::Context;
use tern_relay::{AppState, Relay, router};

use crate::config::Config;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let server = &config.server;
    let backend = config
        .upstream
        .build_backend()
        .context("invalid [upstream] configuration")?;
    let auth = server
        .auth_state()
        .context("invalid [server] configuration")?;

    let relay = Relay::new(backend).with_channel_capacity(server.channel_capacity);
    let state = AppState::new(relay, auth);

    // Warm the metadata cache; a failure here is retried by the first request
    let relay = state.relay.clone();
    tokio::spawn(async move {
        if let Err(e) = relay.metadata().get_or_load().await {
            tracing::warn!("could not preload agent metadata: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(&server.bind)
        .await
        .with_context(|| format!("failed to bind {}", server.bind))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        agent = %config.upstream.agent,
        scope = %server.required_scope,
        "relay listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
