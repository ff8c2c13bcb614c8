use std::sync::Arc;

use clap::Parser;
use therapaw_core::{MemoryTier, TherapawConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use therapaw_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "therapaw.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TherapawConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        print_health(&config);
        return Ok(());
    }

    let state = match HttpState::from_config(config, Arc::new(MemoryTier::new())) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to initialize session storage: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}

fn print_health(config: &TherapawConfig) {
    let storage = &config.storage;
    if storage.is_durable_store_configured() {
        println!(
            "✅ Spaces configured: bucket {} at {}",
            storage.bucket.as_deref().unwrap_or_default(),
            storage.endpoint_url().unwrap_or_default()
        );
    } else {
        println!("⚠️  Spaces not configured: sessions will be kept in memory or in their links");
    }

    if config.vision.api_token.is_some() {
        println!("✅ Replicate token present (model {})", config.vision.model_version);
    } else {
        println!("❌ REPLICATE_API_TOKEN missing: /api/analyze is disabled");
    }

    if config.chat.endpoint.is_some() && config.chat.api_token.is_some() {
        println!("✅ Chat agent configured ({})", config.chat.model);
    } else {
        println!("❌ DO_AGENT_ENDPOINT / DO_API_TOKEN missing: /api/chat is disabled");
    }
}
