use clap::Parser;
use std::error::Error;
use url::Url;

use crate::llm::{ RelayMode, UpstreamConfig, DEFAULT_BASE_URL, DEFAULT_MODEL };
use crate::server::api::DEFAULT_BODY_LIMIT;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Upstream Args ---
    /// Credential for the Thesys generation API. Requests fail with 500 until it is set.
    #[arg(long, env = "THESYS_API_KEY", hide_env_values = true)]
    pub thesys_api_key: Option<String>,

    /// Base URL of the Thesys embed API; `/chat/completions` is appended.
    #[arg(long, env = "THESYS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub thesys_base_url: String,

    /// Generation model identifier.
    #[arg(long, env = "THESYS_MODEL", default_value = DEFAULT_MODEL)]
    pub thesys_model: String,

    /// Sampling temperature forwarded upstream.
    #[arg(long, env = "THESYS_TEMPERATURE", default_value = "0.2")]
    pub temperature: f32,

    // --- Relay Args ---
    /// How POST /api/chat answers (stream, complete). The explicit
    /// /api/chat/stream and /api/chat/complete routes ignore this.
    #[arg(long, env = "RELAY_MODE", default_value = "stream")]
    pub relay_mode: RelayMode,

    /// Largest accepted request body in bytes. The browser resends the whole
    /// conversation, generated artifacts included, on every turn.
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_BODY_LIMIT)]
    pub max_body_bytes: usize,

    // --- General App Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn upstream_config(&self) -> Result<UpstreamConfig, Box<dyn Error + Send + Sync>> {
        Url::parse(&self.thesys_base_url).map_err(|e|
            format!("Invalid THESYS_BASE_URL '{}': {}", self.thesys_base_url, e)
        )?;

        let mut config = UpstreamConfig {
            base_url: self.thesys_base_url.clone(),
            model: self.thesys_model.clone(),
            temperature: self.temperature,
            mode: self.relay_mode,
            ..UpstreamConfig::default()
        };
        if let Some(key) = &self.thesys_api_key {
            config = config.with_api_key(key.clone());
        }
        Ok(config)
    }
}
