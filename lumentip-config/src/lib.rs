//! Typed settings for the lumentip service.
//!
//! Values layer in the usual order: built-in defaults, then an optional
//! TOML file, then environment variables under the `LUMENTIP` prefix
//! (`LUMENTIP__SERVICE__DEPOSITS_CLOSED=true`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use lumentip_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "lumentip.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to render settings template: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write settings template: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ledger: LedgerSettings,
    pub chain: ChainSettings,
    pub service: ServiceSettings,
    pub log: LogSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// SQLite database file backing accounts, transactions, and actions.
    pub db_path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Public key of the service hot wallet, once provisioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub network: String,
    /// Feed paging token to start from when the ledger holds no
    /// deposits yet. Afterwards the latest persisted cursor wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// When set, every inbound deposit is refunded instead of credited.
    pub deposits_closed: bool,
    /// Flat network fee deducted from refunded deposits.
    pub refund_fee: Amount,
    /// Adapters whose `adapter/uniqueId` memos this instance serves.
    pub memo_adapters: Vec<String>,
    /// Destination for `tip-developers` commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_wallet: Option<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger: LedgerSettings::default(),
            chain: ChainSettings::default(),
            service: ServiceSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("lumentip.db"),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            address: None,
            network: "testnet".to_string(),
            start_cursor: None,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            deposits_closed: false,
            refund_fee: Amount::from_stroops(100),
            memo_adapters: vec!["reddit".to_string()],
            developer_wallet: None,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (or [`DEFAULT_CONFIG_PATH`] if present)
    /// plus `LUMENTIP`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(explicit) => builder.add_source(File::from(explicit)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };
        let settings = builder
            .add_source(Environment::with_prefix("LUMENTIP").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Whether a deposit memo naming `adapter` routes to a ledger account.
    pub fn serves_adapter(&self, adapter: &str) -> bool {
        self.service.memo_adapters.iter().any(|a| a == adapter)
    }

    /// Renders the default settings as a TOML template for `init`.
    pub fn template() -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(&Settings::default())?)
    }

    pub fn write_template(path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, Self::template()?)?;
        Ok(())
    }
}
