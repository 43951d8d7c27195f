use std::sync::Arc;

use clap::Parser;
use historial_core::{HistorialConfig, HistoryService, TableRegistry};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use historial_server::http::{start_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "historial.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (SUPABASE_ANON_KEY and friends)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match HistorialConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over service.log_level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    // Connect to the backend
    let gateway = match historial_core::connect(&config.gateway).await {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Failed to connect to {:?} gateway: {}", config.gateway.backend, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match gateway.ping().await {
            Ok(v) => println!("✅ Gateway ({}) reachable: {}", gateway.name(), v),
            Err(e) => {
                println!("❌ Gateway ({}) check failed: {}", gateway.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Historial health check passed");
        return Ok(());
    }

    let registry = TableRegistry::from_config(&config)?;
    let service = HistoryService::from_config(gateway, &config)?;

    if !config.http.enabled {
        tracing::warn!("HTTP API disabled in config; nothing to serve");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState {
        service,
        registry,
        config,
    });
    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
