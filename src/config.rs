use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::analytics::AnalyticsConfig;
use crate::error::AppError;
use crate::ingest::IngestConfig;
use crate::model::tick::{is_valid_symbol, normalize_symbol};
use crate::store::RetentionPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const CONFIG_PATH_ENV: &str = "TICK_PAIRS_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSourceKind {
    Binance,
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub source: FeedSourceKind,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_feed_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_synthetic_period_ms")]
    pub synthetic_period_ms: u64,
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_feed_capacity() -> usize {
    4096
}

fn default_synthetic_period_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 0 disables the count cap.
    pub max_ticks_per_symbol: usize,
    /// 0 disables the age window.
    pub max_age_secs: u64,
    /// Empty keeps ticks in memory only.
    pub database_path: String,
    pub flush_interval_ms: u64,
    /// Ticks per symbol loaded back from the database at startup.
    pub restore_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_ticks_per_symbol: 5_000,
            max_age_secs: 0,
            database_path: "data/ticks.db".to_string(),
            flush_interval_ms: 2_000,
            restore_limit: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub batch_max: usize,
    pub batch_flush_ms: u64,
    pub channel_capacity: usize,
    pub hub_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_max: 100,
            batch_flush_ms: 250,
            channel_capacity: 256,
            hub_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub default_timeframe: String,
    pub default_window: usize,
    pub lookback_bars: usize,
    pub adf_significance: f64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            default_timeframe: "1m".to_string(),
            default_window: 20,
            lookback_bars: 500,
            adf_significance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Parse an interval string (e.g. "1s", "5m", "15min", "1h", "1d", "1w", "1M") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    let s = s.trim();
    let (num_str, suffix) = match s.strip_suffix("min") {
        Some(num) => (num, "m"),
        None => match s.char_indices().last() {
            Some((idx, _)) => s.split_at(idx),
            None => bail!("invalid interval '{}': expected format like '1m'", s),
        },
    };
    if num_str.is_empty() {
        bail!("invalid interval '{}': expected format like '1m'", s);
    }

    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "M" => 30 * 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/min/h/d/w/M",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl FeedConfig {
    /// Configured symbols, normalized, deduplicated, in configured order.
    pub fn active_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = normalize_symbol(sym);
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl StoreConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_ticks_per_symbol: (self.max_ticks_per_symbol > 0).then_some(self.max_ticks_per_symbol),
            max_age_ms: (self.max_age_secs > 0).then(|| self.max_age_secs.saturating_mul(1_000)),
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self.database_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl DeliveryConfig {
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            batch_max: self.batch_max,
            batch_flush: Duration::from_millis(self.batch_flush_ms),
            ..IngestConfig::default()
        }
    }
}

impl AnalyticsSettings {
    pub fn engine_config(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            lookback_bars: self.lookback_bars,
            adf_significance: self.adf_significance,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: String| -> Result<(), AppError> { Err(AppError::Config(msg)) };

        for sym in &self.feed.symbols {
            if !is_valid_symbol(&normalize_symbol(sym)) {
                return invalid(format!("feed.symbols: '{}' is not a valid symbol", sym));
            }
        }
        if self.feed.source == FeedSourceKind::Binance {
            match url::Url::parse(&self.feed.ws_base_url) {
                Ok(u) if matches!(u.scheme(), "ws" | "wss") => {}
                _ => {
                    return invalid(format!(
                        "feed.ws_base_url: '{}' is not a ws:// or wss:// URL",
                        self.feed.ws_base_url
                    ))
                }
            }
        }
        let nonzero = [
            ("feed.channel_capacity", self.feed.channel_capacity as u64),
            ("feed.synthetic_period_ms", self.feed.synthetic_period_ms),
            ("store.flush_interval_ms", self.store.flush_interval_ms),
            ("delivery.batch_max", self.delivery.batch_max as u64),
            ("delivery.batch_flush_ms", self.delivery.batch_flush_ms),
            ("delivery.channel_capacity", self.delivery.channel_capacity as u64),
            ("delivery.hub_capacity", self.delivery.hub_capacity as u64),
            ("analytics.default_window", self.analytics.default_window as u64),
            ("analytics.lookback_bars", self.analytics.lookback_bars as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return invalid(format!("{} must be > 0", name));
            }
        }
        if let Err(e) = parse_interval_ms(&self.analytics.default_timeframe) {
            return invalid(format!("analytics.default_timeframe: {:#}", e));
        }
        let sig = self.analytics.adf_significance;
        if !(sig > 0.0 && sig < 1.0) {
            return invalid(format!(
                "analytics.adf_significance must be in (0, 1), got {}",
                sig
            ));
        }
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return invalid(format!(
                "server.bind_addr: '{}' is not a socket address",
                self.server.bind_addr
            ));
        }
        Ok(())
    }
}
