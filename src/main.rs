use anyhow::Result;
use clap::Parser;
use slotguard::cli::{execute, Cli};
use slotguard::error::ErrorResponse;
use slotguard::notifier::LogSmsSender;
use slotguard::service::AccessGuard;
use slotguard::store::RedisStore;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = cli.config;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("slotguard={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let policies = config
        .policies()
        .map_err(|e| anyhow::anyhow!("Failed to load policies: {}", e))?;

    tracing::info!("Connecting to store at {}", config.redis_url);
    let store = RedisStore::connect(&config.redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to store: {}", e))?;

    let guard = AccessGuard::new(Arc::new(store), Arc::new(LogSmsSender), policies);

    match execute(&guard, cli.command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Command failed");
            println!("{}", serde_json::to_string_pretty(&ErrorResponse::from_guard_error(&e))?);
            Ok(ExitCode::FAILURE)
        }
    }
}
