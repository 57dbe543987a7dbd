use std::sync::Arc;

use clap::Parser;
use sherd_core::{HttpInferenceClient, ObservationStore, SherdConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use sherd_server::http::{self, HttpState};
use sherd_server::subsystems::analyze::AnalysisService;
use sherd_server::subsystems::uploads::UploadDir;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "sherd.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match SherdConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match sherd_core::db::create_pool(&config.storage).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.storage.database_url, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match sherd_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Sherd DB health check passed");
        return Ok(());
    }

    let uploads = UploadDir::open(&config.storage.upload_dir).await?;
    let backend = Arc::new(HttpInferenceClient::new(&config.inference));

    if std::env::var(&config.inference.api_key_env).is_err() {
        tracing::warn!(
            "{} is not set; uploads will be rejected until it is",
            config.inference.api_key_env
        );
    }

    let service = AnalysisService::new(ObservationStore::new(pool), uploads, backend);
    let state = Arc::new(HttpState {
        service: Arc::new(service),
        config,
    });

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await
}
