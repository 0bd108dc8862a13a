pub mod cli;
pub mod config;
pub mod errors;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;

use cli::Args;
use llm::chat::ThesysChatClient;
use log::{ info, warn };
use relay::ArtifactRelay;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = args.upstream_config()?;

    info!("--- Relay Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Upstream Base URL: {}", config.base_url);
    info!("Upstream Model: {}", config.model);
    info!("Temperature: {}", config.temperature);
    info!("Default Relay Mode: {}", config.mode);
    info!("Max Body Bytes: {}", args.max_body_bytes);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("---------------------------");

    if config.credential().is_none() {
        warn!("THESYS_API_KEY is not set. Relay requests will fail until it is configured.");
    }

    let client = ThesysChatClient::new(config.base_url.clone())?;
    let relay = Arc::new(ArtifactRelay::new(config, Arc::new(client)));

    let server = Server::new(args.server_addr.clone(), relay, args.clone());
    server.run().await?;

    Ok(())
}
