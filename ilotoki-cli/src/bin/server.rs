use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ilotoki_app::{Settings, Translator};
use ilotoki_cli::server::router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ilotoki translation server
#[derive(Parser, Debug)]
#[command(name = "ilotoki-server")]
#[command(about = "Offline Toki Pona translation server", long_about = None)]
struct Args {
    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Config file (default: the user's config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    // Default: info level, with --verbose: debug level
    let default_filter = if args.verbose {
        "ilotoki_server=debug,ilotoki_cli=debug,ilotoki_app=debug,ilotoki_engine=debug,tower_http=debug"
    } else {
        "ilotoki_server=info,ilotoki_cli=info,ilotoki_app=info,ilotoki_engine=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let translator = Arc::new(Translator::from_settings(&settings)?);
    tracing::info!(
        "Acquiring model '{}' in the background",
        translator.acquirer().asset().id
    );
    translator.start();

    let app = router(Arc::clone(&translator));

    // Start server
    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("failed to run server")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
