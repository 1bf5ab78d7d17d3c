// =============================================================================
// Shared types used across the Aurora pipeline
// =============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Routing key that subscribes a consumer to every symbol of a channel.
pub const WILDCARD: &str = "*";

/// Candle aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl TimeFrame {
    pub fn minutes(self) -> u64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::TwoHours => 120,
            Self::FourHours => 240,
            Self::OneDay => 1_440,
            Self::ThreeDays => 4_320,
            Self::OneWeek => 10_080,
            Self::OneMonth => 43_200,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.minutes() * 60)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s.trim() {
            "1m" => Self::OneMinute,
            "5m" => Self::FiveMinutes,
            "30m" => Self::ThirtyMinutes,
            "1h" => Self::OneHour,
            "2h" => Self::TwoHours,
            "4h" => Self::FourHours,
            "1d" => Self::OneDay,
            "3d" => Self::ThreeDays,
            "1w" => Self::OneWeek,
            "1M" => Self::OneMonth,
            other => return Err(EngineError::UnknownTimeFrame(other.to_string())),
        };
        Ok(tf)
    }
}

/// A single OHLCV row as returned by the exchange adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time (ms since epoch).
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One executed trade from the exchange trade history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentTrade {
    pub price: f64,
    pub quantity: f64,
    /// Execution time (ms since epoch).
    pub timestamp: i64,
}

/// Best bid / ask snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub timestamp: i64,
}

/// A `(price, quantity)` level of the order book.
pub type BookLevel = (f64, f64);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

/// Balance of a single asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// An open order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub filled: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Split `BTC/USDT` into `("BTC", "USDT")`.
///
/// Symbols without a separator are returned whole as the base currency with
/// an empty quote.
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    symbol.split_once('/').unwrap_or((symbol, ""))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_frame_parses_and_displays() {
        let tf: TimeFrame = "4h".parse().unwrap();
        assert_eq!(tf, TimeFrame::FourHours);
        assert_eq!(tf.to_string(), "4h");
        assert_eq!(tf.duration(), Duration::from_secs(4 * 3600));
        assert!("7m".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn time_frame_serde_uses_short_names() {
        let json = serde_json::to_string(&vec![TimeFrame::OneHour, TimeFrame::OneDay]).unwrap();
        assert_eq!(json, r#"["1h","1d"]"#);
    }

    #[test]
    fn split_symbol_handles_pairs() {
        assert_eq!(split_symbol("BTC/USDT"), ("BTC", "USDT"));
        assert_eq!(split_symbol("BTCUSDT"), ("BTCUSDT", ""));
    }
}
