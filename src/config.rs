// =============================================================================
// Engine Configuration — pipeline tunables with atomic save
// =============================================================================
//
// Every capacity, refresh period and fee the pipeline uses lives here.
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::types::TimeFrame;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_exchange_name() -> String {
    "simulated".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]
}

fn default_time_frames() -> Vec<TimeFrame> {
    vec![TimeFrame::OneHour, TimeFrame::FourHours, TimeFrame::OneDay]
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_consumer_queue_size() -> usize {
    1_000
}

fn default_recent_trade_filter_size() -> u32 {
    1
}

fn default_max_candles() -> usize {
    1_000
}

fn default_max_recent_trades() -> usize {
    100
}

fn default_max_orders() -> usize {
    1_000
}

fn default_simulator_last_prices_to_check() -> usize {
    50
}

fn default_candle_fetch_limit() -> usize {
    500
}

fn default_updater_max_sleeping_secs() -> u64 {
    1
}

fn default_orders_refresh_secs() -> u64 {
    60
}

fn default_ticker_refresh_secs() -> u64 {
    10
}

fn default_order_book_refresh_secs() -> u64 {
    5
}

fn default_recent_trades_refresh_secs() -> u64 {
    5
}

fn default_balance_refresh_secs() -> u64 {
    30
}

fn default_maker_fee() -> f64 {
    0.001
}

fn default_taker_fee() -> f64 {
    0.001
}

fn default_starting_balances() -> HashMap<String, f64> {
    HashMap::from([("USDT".to_string(), 10_000.0)])
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration of one exchange session.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Session -------------------------------------------------------------

    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,

    /// Traded pairs, `BASE/QUOTE`.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_time_frames")]
    pub time_frames: Vec<TimeFrame>,

    /// Replay mode: OHLCV refreshes every tick and simulated orders are
    /// force-updated after each tick.
    #[serde(default)]
    pub backtesting: bool,

    // --- Evaluation export ---------------------------------------------------

    /// Append one matrix row per completed evaluation cycle.
    #[serde(default)]
    pub save_evaluations: bool,

    #[serde(default = "default_export_dir")]
    pub evaluation_export_dir: PathBuf,

    // --- Channels ------------------------------------------------------------

    /// Capacity of every consumer queue. A full queue suspends the producer.
    #[serde(default = "default_consumer_queue_size")]
    pub consumer_queue_size: usize,

    /// Number of recent-trade notifications between two deliveries to
    /// rate-limited consumers.
    #[serde(default = "default_recent_trade_filter_size")]
    pub recent_trade_filter_size: u32,

    // --- Stores --------------------------------------------------------------

    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    #[serde(default = "default_max_recent_trades")]
    pub max_recent_trades: usize,

    #[serde(default = "default_max_orders")]
    pub max_orders: usize,

    /// Size of the trade window used to decide simulated fills.
    #[serde(default = "default_simulator_last_prices_to_check")]
    pub simulator_last_prices_to_check: usize,

    #[serde(default = "default_candle_fetch_limit")]
    pub candle_fetch_limit: usize,

    // --- Refresh periods (seconds) -------------------------------------------

    #[serde(default = "default_updater_max_sleeping_secs")]
    pub updater_max_sleeping_secs: u64,

    #[serde(default = "default_orders_refresh_secs")]
    pub orders_refresh_secs: u64,

    #[serde(default = "default_ticker_refresh_secs")]
    pub ticker_refresh_secs: u64,

    #[serde(default = "default_order_book_refresh_secs")]
    pub order_book_refresh_secs: u64,

    #[serde(default = "default_recent_trades_refresh_secs")]
    pub recent_trades_refresh_secs: u64,

    #[serde(default = "default_balance_refresh_secs")]
    pub balance_refresh_secs: u64,

    // --- Simulated trading ---------------------------------------------------

    #[serde(default = "default_maker_fee")]
    pub maker_fee: f64,

    #[serde(default = "default_taker_fee")]
    pub taker_fee: f64,

    #[serde(default = "default_starting_balances")]
    pub starting_balances: HashMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange_name: default_exchange_name(),
            symbols: default_symbols(),
            time_frames: default_time_frames(),
            backtesting: false,
            save_evaluations: false,
            evaluation_export_dir: default_export_dir(),
            consumer_queue_size: default_consumer_queue_size(),
            recent_trade_filter_size: default_recent_trade_filter_size(),
            max_candles: default_max_candles(),
            max_recent_trades: default_max_recent_trades(),
            max_orders: default_max_orders(),
            simulator_last_prices_to_check: default_simulator_last_prices_to_check(),
            candle_fetch_limit: default_candle_fetch_limit(),
            updater_max_sleeping_secs: default_updater_max_sleeping_secs(),
            orders_refresh_secs: default_orders_refresh_secs(),
            ticker_refresh_secs: default_ticker_refresh_secs(),
            order_book_refresh_secs: default_order_book_refresh_secs(),
            recent_trades_refresh_secs: default_recent_trades_refresh_secs(),
            balance_refresh_secs: default_balance_refresh_secs(),
            maker_fee: default_maker_fee(),
            taker_fee: default_taker_fee(),
            starting_balances: default_starting_balances(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            exchange = %config.exchange_name,
            symbols = ?config.symbols,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply `AURORA_*` overrides from the process environment (a `.env` file
    /// is read first when present).
    pub fn apply_env_overrides(&mut self) {
        let _ = dotenv::dotenv();

        if let Ok(name) = std::env::var("AURORA_EXCHANGE") {
            if !name.trim().is_empty() {
                self.exchange_name = name.trim().to_string();
            }
        }

        if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
            self.symbols = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(tfs) = std::env::var("AURORA_TIME_FRAMES") {
            let mut parsed = Vec::new();
            for raw in tfs.split(',').filter(|s| !s.trim().is_empty()) {
                match raw.trim().parse::<TimeFrame>() {
                    Ok(tf) => parsed.push(tf),
                    Err(e) => warn!(value = raw, error = %e, "ignoring time frame override"),
                }
            }
            self.time_frames = parsed;
        }

        if let Ok(flag) = std::env::var("AURORA_SAVE_EVALUATIONS") {
            self.save_evaluations = matches!(flag.trim(), "1" | "true" | "TRUE" | "yes");
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.exchange_name.trim().is_empty() {
            return Err(EngineError::Config("exchange_name is empty".into()));
        }
        if self.symbols.is_empty() {
            return Err(EngineError::Config("no symbols configured".into()));
        }
        if self.time_frames.is_empty() {
            return Err(EngineError::Config("no time frames configured".into()));
        }
        let capacities = [
            ("consumer_queue_size", self.consumer_queue_size),
            ("max_candles", self.max_candles),
            ("max_recent_trades", self.max_recent_trades),
            ("max_orders", self.max_orders),
            ("simulator_last_prices_to_check", self.simulator_last_prices_to_check),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        if self.recent_trade_filter_size == 0 {
            return Err(EngineError::Config("recent_trade_filter_size must be positive".into()));
        }
        if self.maker_fee < 0.0 || self.taker_fee < 0.0 {
            return Err(EngineError::Config("fees must not be negative".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.exchange_name, "simulated");
        assert_eq!(cfg.time_frames.len(), 3);
        assert_eq!(cfg.max_recent_trades, 100);
        assert!(!cfg.save_evaluations);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols, vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(cfg.consumer_queue_size, 1_000);
        assert!((cfg.taker_fee - 0.001).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["SOL/USDT"], "time_frames": ["5m"], "backtesting": true }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["SOL/USDT"]);
        assert_eq!(cfg.time_frames, vec![TimeFrame::FiveMinutes]);
        assert!(cfg.backtesting);
        assert_eq!(cfg.max_orders, 1_000);
    }

    #[test]
    fn validate_rejects_missing_symbols_and_zero_capacity() {
        let mut cfg = EngineConfig::default();
        cfg.symbols.clear();
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));

        let mut cfg = EngineConfig::default();
        cfg.consumer_queue_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.maker_fee = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut cfg = EngineConfig::default();
        cfg.exchange_name = "binance".into();
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.exchange_name, "binance");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars = [
            ("AURORA_EXCHANGE", " kraken "),
            ("AURORA_SYMBOLS", "sol/usdt, ,ada/usdt"),
            ("AURORA_TIME_FRAMES", "1h, bogus ,4h"),
            ("AURORA_SAVE_EVALUATIONS", "yes"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let mut cfg = EngineConfig::default();
        cfg.apply_env_overrides();
        for (key, _) in vars {
            std::env::remove_var(key);
        }

        assert_eq!(cfg.exchange_name, "kraken");
        assert_eq!(cfg.symbols, vec!["SOL/USDT", "ADA/USDT"]);
        assert_eq!(cfg.time_frames, vec![TimeFrame::OneHour, TimeFrame::FourHours]);
        assert!(cfg.save_evaluations);
        assert!(cfg.validate().is_ok());
    }
}
