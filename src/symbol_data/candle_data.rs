use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;

use crate::types::Candle;

// ---------------------------------------------------------------------------
// CandleData -- six parallel series per (symbol, time frame)
// ---------------------------------------------------------------------------

/// Column-oriented candle history capped at `max_candles`.
///
/// The six series always have the same length. An update carrying the open
/// time of the last stored candle rewrites it in place (live candle); a newer
/// open time appends a new candle and evicts the oldest once full.
#[derive(Debug, Clone)]
pub struct CandleData {
    time: VecDeque<i64>,
    open: VecDeque<f64>,
    high: VecDeque<f64>,
    low: VecDeque<f64>,
    close: VecDeque<f64>,
    volume: VecDeque<f64>,
    max_candles: usize,
}

impl CandleData {
    pub fn new(max_candles: usize) -> Self {
        let max_candles = max_candles.max(1);
        Self {
            time: VecDeque::with_capacity(max_candles),
            open: VecDeque::with_capacity(max_candles),
            high: VecDeque::with_capacity(max_candles),
            low: VecDeque::with_capacity(max_candles),
            close: VecDeque::with_capacity(max_candles),
            volume: VecDeque::with_capacity(max_candles),
            max_candles,
        }
    }

    /// Apply one candle. Returns `true` when a new candle was appended.
    pub fn update(&mut self, candle: &Candle) -> bool {
        match self.time.back().copied() {
            Some(last) if candle.time == last => {
                self.set_last(candle);
                false
            }
            Some(last) if candle.time < last => {
                debug!(time = candle.time, last, "ignoring out-of-order candle");
                false
            }
            _ => {
                self.push(candle);
                true
            }
        }
    }

    /// Apply a batch of candles, oldest first.
    pub fn extend(&mut self, candles: &[Candle]) {
        for candle in candles {
            self.update(candle);
        }
    }

    fn push(&mut self, candle: &Candle) {
        if self.time.len() == self.max_candles {
            self.time.pop_front();
            self.open.pop_front();
            self.high.pop_front();
            self.low.pop_front();
            self.close.pop_front();
            self.volume.pop_front();
        }
        self.time.push_back(candle.time);
        self.open.push_back(candle.open);
        self.high.push_back(candle.high);
        self.low.push_back(candle.low);
        self.close.push_back(candle.close);
        self.volume.push_back(candle.volume);
    }

    fn set_last(&mut self, candle: &Candle) {
        let last = self.time.len() - 1;
        self.open[last] = candle.open;
        self.high[last] = candle.high;
        self.low[last] = candle.low;
        self.close[last] = candle.close;
        self.volume[last] = candle.volume;
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    pub fn last(&self) -> Option<Candle> {
        let i = self.time.len().checked_sub(1)?;
        Some(Candle {
            time: self.time[i],
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
        })
    }

    /// Owned copy of the last `limit` candles (all when `None`).
    ///
    /// The live candle is sanitised so that `low <= close <= high`.
    pub fn snapshot(&self, limit: Option<usize>) -> CandleSnapshot {
        let len = self.time.len();
        let start = limit.map_or(0, |n| len.saturating_sub(n));
        let mut snap = CandleSnapshot {
            time: self.time.range(start..).copied().collect(),
            open: self.open.range(start..).copied().collect(),
            high: self.high.range(start..).copied().collect(),
            low: self.low.range(start..).copied().collect(),
            close: self.close.range(start..).copied().collect(),
            volume: self.volume.range(start..).copied().collect(),
        };
        snap.sanitize_last();
        snap
    }
}

// ---------------------------------------------------------------------------
// CandleSnapshot
// ---------------------------------------------------------------------------

/// Immutable candle history handed to evaluators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleSnapshot {
    pub time: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl CandleSnapshot {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    fn sanitize_last(&mut self) {
        let (Some(close), Some(high), Some(low)) =
            (self.close.last().copied(), self.high.last_mut(), self.low.last_mut())
        else {
            return;
        };
        if close > *high {
            *high = close;
        }
        if close < *low {
            *low = close;
        }
    }
}
