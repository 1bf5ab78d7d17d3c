// =============================================================================
// Routing keys, subscriptions and the counting send filter
// =============================================================================

use std::fmt;

use crate::types::{TimeFrame, WILDCARD};

/// Where a produced payload is headed: a symbol, plus a time frame on
/// candle-keyed channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub symbol: String,
    pub time_frame: Option<TimeFrame>,
}

impl RoutingKey {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            time_frame: None,
        }
    }

    pub fn with_time_frame(symbol: impl Into<String>, time_frame: TimeFrame) -> Self {
        Self {
            symbol: symbol.into(),
            time_frame: Some(time_frame),
        }
    }

    /// Exchange-wide payloads (balance) that carry no symbol.
    pub fn exchange_wide() -> Self {
        Self::symbol(WILDCARD)
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time_frame {
            Some(tf) => write!(f, "{}@{}", self.symbol, tf),
            None => f.write_str(&self.symbol),
        }
    }
}

/// What a consumer wants to receive.
///
/// `symbol == "*"` subscribes to every symbol; `time_frame == None` to every
/// time frame. Rate-limited consumers only see deliveries the channel's send
/// filter lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: String,
    pub time_frame: Option<TimeFrame>,
    pub rate_limited: bool,
}

impl Subscription {
    pub fn all() -> Self {
        Self::symbol(WILDCARD)
    }

    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            time_frame: None,
            rate_limited: false,
        }
    }

    pub fn time_frame(mut self, time_frame: TimeFrame) -> Self {
        self.time_frame = Some(time_frame);
        self
    }

    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    /// A payload without a time frame reaches every time-frame subscriber.
    pub fn accepts_time_frame(&self, time_frame: Option<TimeFrame>) -> bool {
        match (self.time_frame, time_frame) {
            (Some(wanted), Some(got)) => wanted == got,
            _ => true,
        }
    }
}

// -----------------------------------------------------------------------------
// SendFilter
// -----------------------------------------------------------------------------

/// Counting backpressure filter shared by every symbol of one channel.
///
/// Every produced notification bumps the counter; once it reaches
/// `filter_size` the next consumer lookup is flagged and rate-limited
/// consumers are included. The counter resets after a flagged delivery.
///
/// The counter is channel-wide, not per symbol: with `filter_size` 2 and
/// two symbols sent alternately, every flagged delivery lands on the same
/// symbol and the rate-limited consumers of the other one are never served.
/// Wildcard rate-limited consumers are unaffected.
#[derive(Debug, Clone)]
pub struct SendFilter {
    filter_size: u32,
    counter: u32,
    flagged: bool,
}

impl SendFilter {
    pub fn new(filter_size: u32) -> Self {
        Self {
            filter_size: filter_size.max(1),
            counter: 0,
            flagged: false,
        }
    }

    pub fn will_send(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    /// Latch the flag for the delivery in progress and return it.
    pub fn evaluate(&mut self) -> bool {
        self.flagged = self.counter >= self.filter_size;
        self.flagged
    }

    pub fn has_send(&mut self) {
        if self.flagged {
            self.counter = 0;
            self.flagged = false;
        }
    }

    pub fn filter_size(&self) -> u32 {
        self.filter_size
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl Default for SendFilter {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_flags_every_nth_notification() {
        let mut filter = SendFilter::new(3);
        let mut flagged = 0;
        for _ in 0..9 {
            filter.will_send();
            if filter.evaluate() {
                flagged += 1;
            }
            filter.has_send();
        }
        assert_eq!(flagged, 3);
        assert_eq!(filter.counter(), 0);
    }

    #[test]
    fn filter_size_one_flags_everything() {
        let mut filter = SendFilter::default();
        for _ in 0..4 {
            filter.will_send();
            assert!(filter.evaluate());
            filter.has_send();
        }
    }

    #[test]
    fn zero_filter_size_is_clamped() {
        assert_eq!(SendFilter::new(0).filter_size(), 1);
    }

    #[test]
    fn subscription_time_frame_matching() {
        let sub = Subscription::symbol("BTC/USDT").time_frame(TimeFrame::OneHour);
        assert!(sub.accepts_time_frame(Some(TimeFrame::OneHour)));
        assert!(!sub.accepts_time_frame(Some(TimeFrame::FourHours)));
        assert!(sub.accepts_time_frame(None));
        assert!(Subscription::all().accepts_time_frame(Some(TimeFrame::OneDay)));
    }

    #[test]
    fn routing_key_display() {
        assert_eq!(
            RoutingKey::with_time_frame("ETH/USDT", TimeFrame::FiveMinutes).to_string(),
            "ETH/USDT@5m"
        );
        assert_eq!(RoutingKey::exchange_wide().to_string(), "*");
    }
}
