// src/main.rs
//! Incubator auth server entry point
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use incubator_auth::api::create_router;
use incubator_auth::auth::{AuthConfig, AuthService};
use incubator_auth::auth::storage::MemoryStore;
use incubator_auth::cache::{Cache, CacheStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "incubator_auth")]
#[command(about = "Incubator authentication server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the auth server
    Server {
        /// Address to bind, overrides BIND_ADDR
        #[arg(long)]
        host: Option<String>,
        /// Port to bind the server to
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate configuration from the environment, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    info!("Starting incubator auth v{}", env!("CARGO_PKG_VERSION"));

    let config = AuthConfig::from_env().context("Invalid auth configuration")?;

    match args.command {
        Some(Commands::CheckConfig) => {
            info!(environment = ?config.environment, jwt = ?config.jwt, "Configuration OK");
            Ok(())
        }
        Some(Commands::Server { host, port }) => serve(config, bind_addr(host, port)?).await,
        None => serve(config, bind_addr(None, None)?).await,
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=info,h2=info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn bind_addr(host: Option<String>, port: Option<u16>) -> Result<SocketAddr> {
    let default: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()
        .context("BIND_ADDR must look like 127.0.0.1:8080")?;
    let ip = match host {
        Some(host) => host.parse().context("--host must be an IP address")?,
        None => default.ip(),
    };
    Ok(SocketAddr::new(ip, port.unwrap_or(default.port())))
}

async fn serve(config: AuthConfig, addr: SocketAddr) -> Result<()> {
    let cache = Arc::new(Cache::connect(&config.cache).await);
    info!(mode = ?cache.mode(), "Cache ready");

    let store = Arc::new(MemoryStore::new());
    let cache_store: Arc<dyn CacheStore> = cache.clone();
    let service = Arc::new(AuthService::new(config, store, cache_store)?);
    let app = create_router(service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cache.disconnect().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
