use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accounting::TaxRule;
use crate::error::ConfigError;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// Decimal places realized P/L is rounded to.
    pub rounding_scale: u32,
    pub tax_rule: TaxRule,
    pub busy_timeout_ms: u64,
    pub listen_addr: String,
    pub cache_ttl_secs: u64,
    pub default_account_name: String,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            database_path: PathBuf::from("ledger.sqlite3"),
            rounding_scale: 2,
            tax_rule: TaxRule::Proceeds,
            busy_timeout_ms: 5000,
            listen_addr: "127.0.0.1:3000".to_string(),
            cache_ttl_secs: 300,
            default_account_name: "Default account".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Config, ConfigError> {
        let file = std::fs::File::open(config_path)?;
        let config: Config = ::serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// Like [`Config::new`], but a missing file yields the defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Config, ConfigError> {
        if config_path.exists() {
            Config::new(config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
