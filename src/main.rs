use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use natours_api::config::{AppConfig, StorageKind};
use natours_api::database::{DocumentStore, MemoryStore, PgStore};
use natours_api::services::LogDelivery;
use natours_api::{ensure_collections, router, AppState};

#[derive(Clone, Copy, ValueEnum)]
enum Storage {
    Postgres,
    Memory,
}

#[derive(Parser)]
#[command(name = "natours-api")]
#[command(about = "Tour booking REST API")]
#[command(version)]
struct Args {
    #[arg(long, help = "Port to listen on (overrides PORT)")]
    port: Option<u16>,

    #[arg(long, value_enum, help = "Document storage backend (overrides STORAGE)")]
    storage: Option<Storage>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("natours_api=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(storage) = args.storage {
        config.server.storage = match storage {
            Storage::Postgres => StorageKind::Postgres,
            Storage::Memory => StorageKind::Memory,
        };
    }
    tracing::info!("Starting natours-api in {:?} mode", config.environment);

    let store: Arc<dyn DocumentStore> = match config.server.storage {
        StorageKind::Postgres => Arc::new(PgStore::connect(&config.database).await?),
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };
    ensure_collections(store.as_ref()).await?;

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let state = AppState::new(config, store, Arc::new(LogDelivery))?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
