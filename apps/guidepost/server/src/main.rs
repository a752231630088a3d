use anyhow::Context;
use clap::Parser;
use guidepost_server::{config::{Cli, ServerConfig}, Bridge};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialize tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = ServerConfig::try_from(Cli::parse())?;
    info!(listen_addr = %config.listen_addr, "starting guidance bridge");

    let bridge = Bridge::new();
    bridge
        .start(config.listen_addr)
        .await
        .context("failed to start bridge listener")?;

    // Push zoom preferences whenever a companion attaches.
    let status_bridge = bridge.clone();
    let zoom_font_size = config.zoom_font_size.clone();
    let zoom_enabled = config.zoom_enabled;
    tokio::spawn(async move {
        let mut status = status_bridge.watch_status();
        loop {
            if *status.borrow_and_update() {
                info!("companion attached");
                status_bridge.set_zoom(&zoom_font_size, zoom_enabled);
            } else {
                info!("no companion attached");
            }
            if status.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutdown requested");
    bridge.stop().await;
    Ok(())
}
