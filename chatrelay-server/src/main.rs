use std::sync::Arc;

use chatrelay_core::{ChatModel, ChatRelayConfig, ConversationStore, GeminiChatClient};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use chatrelay_server::http::{self, AppState};
use chatrelay_server::service::ChatService;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "chatrelay.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match ChatRelayConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB
    let pool = match chatrelay_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match chatrelay_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ chatrelay DB health check passed");
        return Ok(());
    }

    chatrelay_core::db::migrate(&pool).await?;

    // Model adapter
    let api_key = config.model.api_key_from_env();
    let client = GeminiChatClient::new(config.model.clone(), api_key)?;
    if client.has_api_key() {
        tracing::info!(model = %config.model.model, "Model adapter initialized");
    } else {
        tracing::warn!(
            env = %config.model.api_key_env,
            "Model API key not set; chat requests will fail until it is provided"
        );
    }
    let model: Arc<dyn ChatModel> = Arc::new(client);

    let state = Arc::new(AppState {
        service: ChatService::new(ConversationStore::new(pool), model),
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

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
