mod config;
mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use config::AppConfig;
use routes::{app_router, AppState};

#[derive(Parser)]
#[command(name = "playsync-api")]
#[command(about = "HTTP front end for the playsync engine")]
#[command(version)]
struct Cli {
    /// Address to listen on (overrides PLAYSYNC_BIND_ADDR)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Load environment variables from this file before reading config
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            // Only load .env in development; production uses platform-native env injection.
            #[cfg(debug_assertions)]
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playsync_api=info".parse().expect("valid directive"))
                .add_directive("playsync_core=info".parse().expect("valid directive")),
        )
        .init();

    let mut config = AppConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);
    tracing::info!("Starting playsync-api with config: {:?}", config);

    let state = AppState::from_config(config);
    let _cleanup = state.engine.start_cleanup_task();
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("playsync-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
