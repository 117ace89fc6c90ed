//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration. Fields correspond exactly to the recognized
/// configuration options of the external interface surface.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `MongoDB` connection string for the document store.
    pub database_url: String,
    /// Public URL of this instance, used in rendered messenger links.
    pub site_url: String,
    /// Host to bind the ambient HTTP server to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind the ambient HTTP server to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables verbose diagnostics.
    #[serde(default)]
    pub debug: bool,
    /// Allowed CORS origins for the ambient HTTP server.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Root directory for the attachment blob store.
    pub attachments_path: String,
    /// Root directory for derived image renditions.
    pub images_path: String,
    /// Telegram bot token. The messenger worker only starts when this is set.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// Maximum accepted upload size, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_upload_size() -> u64 {
    500 * 1024 * 1024
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `SPACENOTE_ENV`)
    /// 3. Environment variables with a `SPACENOTE_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("SPACENOTE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SPACENOTE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SPACENOTE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
