pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod state;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the nl2sql service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config)?.run().await
}
