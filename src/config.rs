//! Configuration
//!
//! Layered loading, highest priority last applied: built-in defaults, JSON
//! config file, `FLOWBOOK_*` environment variables, CLI flags (applied by
//! main). Invalid environment values are reported and discarded; the prior
//! value wins.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Venue endpoints and reconnect policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ws_host: String,
    pub ws_port: u16,
    pub rest_host: String,
    pub rest_port: u16,
    /// Lowercase trading symbol, e.g. "btcusdt"
    pub symbol: String,
    pub reconnect_delay_initial_ms: u64,
    pub reconnect_delay_max_ms: u64,
    pub reconnect_backoff_multiplier: f64,
    pub reconnect_jitter_factor: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ws_host: "fstream.binance.com".to_string(),
            ws_port: 443,
            rest_host: "fapi.binance.com".to_string(),
            rest_port: 443,
            symbol: "btcusdt".to_string(),
            reconnect_delay_initial_ms: 1_000,
            reconnect_delay_max_ms: 30_000,
            reconnect_backoff_multiplier: 2.0,
            reconnect_jitter_factor: 0.3,
        }
    }
}

/// Engine sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring capacity; must be a power of two
    pub queue_capacity: usize,
    pub vwap_window: usize,
    pub large_trade_std_devs: f64,
    /// REST snapshot depth
    pub depth_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
            vwap_window: 100,
            large_trade_std_devs: 2.0,
            depth_limit: 1_000,
        }
    }
}

/// Output cadence and local endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub console_interval_ms: u64,
    pub broadcast_port: u16,
    pub health_port: u16,
    pub imbalance_levels: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console_interval_ms: 500,
            broadcast_port: 9001,
            health_port: 9090,
            imbalance_levels: 5,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub engine: EngineConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load with defaults <- file <- environment. CLI overrides are applied
    /// by the caller on top.
    pub fn load(config_path: Option<&Path>) -> Config {
        dotenvy::dotenv().ok();

        let mut config = match config_path {
            Some(path) => match Self::load_from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Config file ignored, using defaults");
                    Config::default()
                }
            },
            None => Config::default(),
        };

        config.apply_env_overrides();
        config.validate();
        config
    }

    /// Parse a JSON config file; missing fields fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Config, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {e}"))?;
        serde_json::from_str(&content).map_err(|e| format!("failed to parse config file: {e}"))
    }

    /// `FLOWBOOK_*` environment overrides; invalid values warn and keep the
    /// prior setting.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("FLOWBOOK_WS_HOST") {
            self.network.ws_host = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_WS_PORT", |p: &u16| *p >= 1) {
            self.network.ws_port = v;
        }
        if let Some(v) = env_string("FLOWBOOK_REST_HOST") {
            self.network.rest_host = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_REST_PORT", |p: &u16| *p >= 1) {
            self.network.rest_port = v;
        }
        if let Some(v) = env_string("FLOWBOOK_SYMBOL") {
            self.network.symbol = v.to_lowercase();
        }
        if let Some(v) = env_parse("FLOWBOOK_RECONNECT_DELAY_INITIAL_MS", |ms: &u64| {
            (100..=300_000).contains(ms)
        }) {
            self.network.reconnect_delay_initial_ms = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_RECONNECT_DELAY_MAX_MS", |ms: &u64| {
            (1_000..=600_000).contains(ms)
        }) {
            self.network.reconnect_delay_max_ms = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_RECONNECT_BACKOFF_MULTIPLIER", |m: &f64| {
            *m > 0.0 && *m <= 10.0
        }) {
            self.network.reconnect_backoff_multiplier = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_RECONNECT_JITTER_FACTOR", |j: &f64| {
            (0.0..=1.0).contains(j)
        }) {
            self.network.reconnect_jitter_factor = v;
        }

        if let Some(v) = env_parse("FLOWBOOK_QUEUE_CAPACITY", |n: &usize| {
            n.is_power_of_two() && *n <= 1_048_576
        }) {
            self.engine.queue_capacity = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_VWAP_WINDOW", |n: &usize| {
            (1..=10_000).contains(n)
        }) {
            self.engine.vwap_window = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_LARGE_TRADE_STD_DEVS", |d: &f64| *d > 0.0) {
            self.engine.large_trade_std_devs = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_DEPTH_LIMIT", |n: &usize| (1..=5_000).contains(n)) {
            self.engine.depth_limit = v;
        }

        if let Some(v) = env_parse("FLOWBOOK_CONSOLE_INTERVAL_MS", |ms: &u64| {
            (100..=60_000).contains(ms)
        }) {
            self.output.console_interval_ms = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_BROADCAST_PORT", |p: &u16| *p >= 1024) {
            self.output.broadcast_port = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_HEALTH_PORT", |p: &u16| *p >= 1024) {
            self.output.health_port = v;
        }
        if let Some(v) = env_parse("FLOWBOOK_IMBALANCE_LEVELS", |n: &usize| (1..=100).contains(n)) {
            self.output.imbalance_levels = v;
        }
    }

    /// Final sanity pass over values any layer may have supplied.
    fn validate(&mut self) {
        if !self.engine.queue_capacity.is_power_of_two() || self.engine.queue_capacity == 0 {
            let fallback = EngineConfig::default().queue_capacity;
            warn!(
                configured = self.engine.queue_capacity,
                fallback, "queue_capacity must be a power of two"
            );
            self.engine.queue_capacity = fallback;
        }
        if self.network.reconnect_delay_max_ms < self.network.reconnect_delay_initial_ms {
            warn!("reconnect_delay_max_ms below initial delay, raising to initial");
            self.network.reconnect_delay_max_ms = self.network.reconnect_delay_initial_ms;
        }
    }

    /// Combined-stream WebSocket URL for depth + aggTrade.
    pub fn ws_stream_url(&self) -> String {
        let symbol = self.network.symbol.to_lowercase();
        format!(
            "wss://{}:{}/stream?streams={symbol}@depth@100ms/{symbol}@aggTrade",
            self.network.ws_host, self.network.ws_port
        )
    }

    /// REST depth snapshot URL.
    pub fn rest_depth_url(&self) -> String {
        format!(
            "https://{}:{}/fapi/v1/depth?symbol={}&limit={}",
            self.network.rest_host,
            self.network.rest_port,
            self.network.symbol.to_uppercase(),
            self.engine.depth_limit
        )
    }

    pub fn console_interval(&self) -> Duration {
        Duration::from_millis(self.output.console_interval_ms)
    }

    pub fn reconnect_delay_initial(&self) -> Duration {
        Duration::from_millis(self.network.reconnect_delay_initial_ms)
    }

    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.network.reconnect_delay_max_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse and range-check an environment variable; report and discard
/// anything that does not pass.
fn env_parse<T: FromStr>(name: &str, valid: impl Fn(&T) -> bool) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        Ok(_) => {
            warn!(var = name, value = %raw, "Environment value out of range, ignoring");
            None
        }
        Err(_) => {
            warn!(var = name, value = %raw, "Invalid environment value, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.symbol, "btcusdt");
        assert_eq!(config.engine.queue_capacity, 65_536);
        assert!(config.engine.queue_capacity.is_power_of_two());
        assert_eq!(config.output.console_interval_ms, 500);
        assert_eq!(config.output.imbalance_levels, 5);
    }

    #[test]
    fn test_stream_url() {
        let config = Config::default();
        assert_eq!(
            config.ws_stream_url(),
            "wss://fstream.binance.com:443/stream?streams=btcusdt@depth@100ms/btcusdt@aggTrade"
        );
    }

    #[test]
    fn test_rest_url_uppercases_symbol() {
        let mut config = Config::default();
        config.network.symbol = "ethusdt".to_string();
        config.engine.depth_limit = 500;
        assert_eq!(
            config.rest_depth_url(),
            "https://fapi.binance.com:443/fapi/v1/depth?symbol=ETHUSDT&limit=500"
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = serde_json::from_str(
            r#"{
                "network": {"symbol": "solusdt"},
                "engine": {"vwap_window": 250}
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.network.symbol, "solusdt");
        assert_eq!(parsed.engine.vwap_window, 250);
        // untouched sections and fields stay at defaults
        assert_eq!(parsed.network.ws_host, "fstream.binance.com");
        assert_eq!(parsed.engine.queue_capacity, 65_536);
        assert_eq!(parsed.output.broadcast_port, 9001);
    }

    #[test]
    fn test_validate_rejects_non_power_of_two_queue() {
        let mut config = Config::default();
        config.engine.queue_capacity = 100_000;
        config.validate();
        assert_eq!(config.engine.queue_capacity, 65_536);
    }

    #[test]
    fn test_validate_orders_reconnect_delays() {
        let mut config = Config::default();
        config.network.reconnect_delay_initial_ms = 5_000;
        config.network.reconnect_delay_max_ms = 1_000;
        config.validate();
        assert_eq!(config.network.reconnect_delay_max_ms, 5_000);
    }

    #[test]
    fn test_env_override_applies_and_rejects() {
        std::env::set_var("FLOWBOOK_VWAP_WINDOW", "300");
        std::env::set_var("FLOWBOOK_QUEUE_CAPACITY", "100000"); // not a power of two

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.engine.vwap_window, 300);
        // invalid value discarded, default retained
        assert_eq!(config.engine.queue_capacity, 65_536);

        std::env::remove_var("FLOWBOOK_VWAP_WINDOW");
        std::env::remove_var("FLOWBOOK_QUEUE_CAPACITY");
    }

    #[test]
    fn test_env_symbol_lowercased() {
        std::env::set_var("FLOWBOOK_SYMBOL", "ETHUSDT");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.network.symbol, "ethusdt");
        std::env::remove_var("FLOWBOOK_SYMBOL");
    }
}
