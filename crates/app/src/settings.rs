//! Handles settings for the application. Configuration is read from
//! `settings.toml` (optional) and from `SIMPLE_BANK__*` environment variables,
//! e.g. `SIMPLE_BANK__DATABASE__URL`.
use config::{Config, ConfigError, Environment, File};
use engine::BalancePolicy;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "settings";

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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite:./simple_bank.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Ledger {
    pub negative_balance: BalancePolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub ledger: Ledger,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(false))
            .add_source(Environment::with_prefix("SIMPLE_BANK").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
