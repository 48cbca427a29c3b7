use anyhow::{anyhow, Context, Result};
use tokio::net::TcpListener;

use tick_pairs::app::App;
use tick_pairs::config::{Config, LoggingConfig};
use tick_pairs::server;

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(&logging.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Load config
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set TICK_PAIRS_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        source = ?config.feed.source,
        symbols = ?config.feed.active_symbols(),
        bind = %config.server.bind_addr,
        "Starting tick-pairs"
    );

    let app = App::build(config)?;
    let listener = TcpListener::bind(&app.config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", app.config.server.bind_addr))?;
    let server_task = tokio::spawn(server::serve(listener, app.state()));

    app.ingestor.start().await;

    // Ctrl+C handler
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Ctrl+C received");

    app.shutdown().await?;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "HTTP server exited with error"),
        Err(e) => tracing::warn!(error = %e, "HTTP server task panicked"),
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
