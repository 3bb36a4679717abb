//! Typed market delta events decoded off the socket feed

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One completed trade execution inside a delta
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fill {
    #[serde(default)]
    pub order_type: String,
    pub rate: f64,
    pub quantity: f64,
    #[serde(deserialize_with = "de_naive_utc")]
    pub time_stamp: DateTime<Utc>,
}

/// One order book change inside a delta
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBookEntry {
    #[serde(default, rename = "Type")]
    pub entry_type: u8,
    pub rate: f64,
    pub quantity: f64,
}

/// One update event for a market, immutable once recorded
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketDelta {
    pub market_name: String,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default)]
    pub buys: Vec<OrderBookEntry>,
    #[serde(default)]
    pub sells: Vec<OrderBookEntry>,
    /// Ingestion timestamp, stamped by the stream client
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl MarketDelta {
    /// Count fills that executed before the given signal time.
    pub fn fills_before(&self, signal_time: DateTime<Utc>) -> usize {
        self.fills
            .iter()
            .filter(|fill| fill.time_stamp < signal_time)
            .count()
    }

    /// True if more than `ratio` of this delta's fills predate the signal.
    pub fn is_mostly_pre_signal(&self, signal_time: DateTime<Utc>, ratio: f64) -> bool {
        !self.fills.is_empty()
            && self.fills_before(signal_time) as f64 > ratio * self.fills.len() as f64
    }

    /// Highest fill rate, falling back to the highest buy rate.
    pub fn max_rate(&self) -> Option<f64> {
        let max_fill = self
            .fills
            .iter()
            .map(|fill| fill.rate)
            .fold(None, |max: Option<f64>, rate| {
                Some(max.map_or(rate, |m| m.max(rate)))
            });
        max_fill.or_else(|| {
            self.buys
                .iter()
                .map(|buy| buy.rate)
                .fold(None, |max: Option<f64>, rate| {
                    Some(max.map_or(rate, |m| m.max(rate)))
                })
        })
    }

    /// Lowest fill rate in this delta.
    pub fn min_fill_rate(&self) -> Option<f64> {
        self.fills
            .iter()
            .map(|fill| fill.rate)
            .fold(None, |min: Option<f64>, rate| {
                Some(min.map_or(rate, |m| m.min(rate)))
            })
    }
}

/// Event emitted by the market stream client
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// A per-market delta arrived
    Delta(MarketDelta),
    /// Connected to the socket
    Connected,
    /// Disconnected from the socket
    Disconnected,
    /// Unrecoverable stream error
    Error(String),
}

// Exchange timestamps come as naive UTC with an optional fraction
fn de_naive_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fill_at(rate: f64, time_stamp: DateTime<Utc>) -> Fill {
        Fill {
            order_type: "BUY".to_string(),
            rate,
            quantity: 100.0,
            time_stamp,
        }
    }

    #[test]
    fn test_fill_decodes_exchange_timestamp() {
        let json = r#"{
            "OrderType": "BUY",
            "Rate": 0.000012,
            "Quantity": 5000.0,
            "TimeStamp": "2017-11-05T16:00:01.12"
        }"#;
        let fill: Fill = serde_json::from_str(json).unwrap();
        assert_eq!(fill.rate, 0.000012);
        assert_eq!(
            fill.time_stamp,
            Utc.with_ymd_and_hms(2017, 11, 5, 16, 0, 1).unwrap()
                + chrono::Duration::milliseconds(120)
        );
    }

    #[test]
    fn test_fills_before_counts_by_timestamp() {
        let signal = Utc.with_ymd_and_hms(2017, 11, 5, 16, 0, 0).unwrap();
        let delta = MarketDelta {
            market_name: "BTC-XVG".to_string(),
            fills: vec![
                fill_at(0.1, signal - chrono::Duration::seconds(5)),
                fill_at(0.2, signal - chrono::Duration::seconds(1)),
                fill_at(0.3, signal + chrono::Duration::seconds(2)),
            ],
            buys: vec![],
            sells: vec![],
            received_at: Utc::now(),
        };

        assert_eq!(delta.fills_before(signal), 2);
        assert!(!delta.is_mostly_pre_signal(signal, 0.75));
        assert!(delta.is_mostly_pre_signal(signal, 0.5));
    }

    #[test]
    fn test_max_rate_prefers_fills_over_buys() {
        let now = Utc::now();
        let mut delta = MarketDelta {
            market_name: "BTC-XVG".to_string(),
            fills: vec![fill_at(0.2, now), fill_at(0.5, now)],
            buys: vec![OrderBookEntry {
                entry_type: 0,
                rate: 0.9,
                quantity: 1.0,
            }],
            sells: vec![],
            received_at: now,
        };
        assert_eq!(delta.max_rate(), Some(0.5));

        delta.fills.clear();
        assert_eq!(delta.max_rate(), Some(0.9));

        delta.buys.clear();
        assert_eq!(delta.max_rate(), None);
    }

    #[test]
    fn test_min_fill_rate() {
        let now = Utc::now();
        let delta = MarketDelta {
            market_name: "BTC-XVG".to_string(),
            fills: vec![fill_at(0.4, now), fill_at(0.1, now), fill_at(0.7, now)],
            buys: vec![],
            sells: vec![],
            received_at: now,
        };
        assert_eq!(delta.min_fill_rate(), Some(0.1));
    }
}
