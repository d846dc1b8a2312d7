//! Application configuration.
//!
//! A single TOML file with `${VAR}` placeholders resolved against the
//! process environment at load time, so secrets never live in the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kt_broker::LsConfig;
use kt_risk::RiskLimits;
use kt_types::{KtError, KtResult};

/// Trading-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Bar timeframe, e.g. "1m", "5m".
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Fallback symbols when no universe snapshot exists for the day.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Universe size from the morning scan.
    #[serde(default = "default_universe_size")]
    pub universe_size: usize,
    /// Liquidity floor in KRW previous-day traded value.
    #[serde(default = "default_min_traded_value")]
    pub min_traded_value: i64,
    /// Registry name of the strategy to run.
    pub strategy: String,
    /// Parameter bundle forwarded to the strategy factory.
    #[serde(default)]
    pub strategy_params: Value,
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_universe_size() -> usize {
    10
}

fn default_min_traded_value() -> i64 {
    100_000_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/ohlc")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub broker: LsConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_universe_file")]
    pub universe_file: PathBuf,
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_universe_file() -> PathBuf {
    PathBuf::from("data/active_universe.json")
}

impl AppConfig {
    pub fn load(path: &Path) -> KtResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KtError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> KtResult<Self> {
        let expanded = expand_env(raw)?;
        toml::from_str(&expanded).map_err(|e| KtError::Config(e.to_string()))
    }
}

/// Replace every `${VAR}` with the value from the environment. A missing
/// variable is a configuration error, not an empty string.
fn expand_env(raw: &str) -> KtResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(KtError::Config("unterminated ${ placeholder".into()));
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                return Err(KtError::Config(format!(
                    "environment variable {name} is not set"
                )))
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
