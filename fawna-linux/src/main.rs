// Fawna Linux: mesh node daemon over a LAN stand-in radio, with a line console.

mod config;
mod console;
mod radio;
mod transport;
mod wire;

use std::sync::Arc;

use fawna_core::host::HostPermissions;
use fawna_core::{event_channel, MeshNode, NodeContext, NodeIdentity};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("fawna-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let identity = NodeIdentity::from_config(&cfg.node)?;
    let permissions = Arc::new(HostPermissions::from_mask(cfg.permission_mask()));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (events_tx, events_rx) = event_channel();
        let radio = Arc::new(
            radio::LanRadio::bind(&identity, cfg.discovery_port, cfg.transport_port, events_tx)
                .await?,
        );
        let ctx = Arc::new(NodeContext::new(
            &cfg.node,
            radio,
            permissions,
            Arc::new(console::ConsoleSink),
        )?);
        tracing::info!(name = %identity.name(), "fawna node starting");
        let node = MeshNode::start(ctx, events_rx);

        let result = tokio::select! {
            r = console::run(&node) => r,
            r = shutdown_signal() => r,
        };
        node.stop().await;
        result?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
