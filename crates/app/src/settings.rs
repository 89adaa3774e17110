//! Settings of the `pennywise` server binary.
//!
//! Read from `config/pennywise.toml` (optional) and overridden by
//! `PENNYWISE_*` environment variables, e.g. `PENNYWISE_SERVER__PORT=8080`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "config/pennywise";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Where the server keeps its records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub database: Database,
    pub bind: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    pub server: Option<Server>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let path =
            std::env::var("PENNYWISE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("PENNYWISE").separator("__"))
            .build()?
            .try_deserialize()
    }
}
