//! Bounded per-market delta history
//!
//! One ring buffer per market, most-recent-last, oldest silently evicted
//! once the window is full. Owned by the registry; consumers share it
//! behind a tokio RwLock since the stream task keeps appending while
//! chunk tasks read rate references.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::stream::MarketDelta;

/// Bounded ordered sequence of deltas for one market
#[derive(Debug)]
pub struct MarketHistory {
    deltas: VecDeque<MarketDelta>,
    max_len: usize,
}

impl MarketHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            deltas: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Append a delta, evicting the oldest entry when over capacity.
    pub fn push(&mut self, delta: MarketDelta) {
        self.deltas.push_back(delta);
        while self.deltas.len() > self.max_len {
            self.deltas.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&MarketDelta> {
        self.deltas.back()
    }

    /// Iterate newest-first over every entry except the latest.
    pub fn older_newest_first(&self) -> impl Iterator<Item = &MarketDelta> {
        self.deltas.iter().rev().skip(1)
    }

    /// Most recent usable rate: scan backward for the first delta that
    /// carries fills (or buys) and take its max rate.
    pub fn max_rate(&self) -> Option<f64> {
        self.deltas.iter().rev().find_map(|delta| delta.max_rate())
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Registry owning one history per tracked market
#[derive(Debug)]
pub struct MarketRegistry {
    histories: HashMap<String, MarketHistory>,
    window_len: usize,
}

/// Registry handle shared between the stream consumer and chunk tasks
pub type SharedRegistry = Arc<RwLock<MarketRegistry>>;

impl MarketRegistry {
    pub fn new(window_len: usize) -> Self {
        Self {
            histories: HashMap::new(),
            window_len,
        }
    }

    pub fn shared(window_len: usize) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(window_len)))
    }

    /// Record a delta, creating the market's history on first sight.
    pub fn record(&mut self, delta: MarketDelta) {
        let window_len = self.window_len;
        self.histories
            .entry(delta.market_name.clone())
            .or_insert_with(|| MarketHistory::new(window_len))
            .push(delta);
    }

    pub fn history(&self, market: &str) -> Option<&MarketHistory> {
        self.histories.get(market)
    }

    /// Max observed rate for a market, newest delta first.
    pub fn max_rate(&self, market: &str) -> Option<f64> {
        self.histories.get(market).and_then(|h| h.max_rate())
    }

    /// Min fill rate of the market's newest delta.
    pub fn latest_min_fill_rate(&self, market: &str) -> Option<f64> {
        self.histories
            .get(market)
            .and_then(|h| h.latest())
            .and_then(|delta| delta.min_fill_rate())
    }

    pub fn market_count(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Fill, OrderBookEntry};
    use chrono::Utc;

    fn delta(market: &str, fill_rates: &[f64]) -> MarketDelta {
        MarketDelta {
            market_name: market.to_string(),
            fills: fill_rates
                .iter()
                .map(|&rate| Fill {
                    order_type: "BUY".to_string(),
                    rate,
                    quantity: 10.0,
                    time_stamp: Utc::now(),
                })
                .collect(),
            buys: vec![],
            sells: vec![],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_evicts_oldest_at_capacity() {
        let mut history = MarketHistory::new(3);

        for i in 0..5 {
            history.push(delta("BTC-XVG", &[i as f64]));
        }

        assert_eq!(history.len(), 3);
        // FIFO eviction: entries 0 and 1 are gone
        let rates: Vec<f64> = history
            .older_newest_first()
            .map(|d| d.fills[0].rate)
            .collect();
        assert_eq!(rates, vec![3.0, 2.0]);
        assert_eq!(history.latest().unwrap().fills[0].rate, 4.0);
    }

    #[test]
    fn test_max_rate_skips_empty_deltas() {
        let mut history = MarketHistory::new(5);
        history.push(delta("BTC-XVG", &[0.4, 0.6]));
        history.push(delta("BTC-XVG", &[]));

        // Newest delta has no fills or buys, so the older one supplies it
        assert_eq!(history.max_rate(), Some(0.6));
    }

    #[test]
    fn test_max_rate_uses_buys_when_no_fills() {
        let mut history = MarketHistory::new(5);
        let mut d = delta("BTC-XVG", &[]);
        d.buys.push(OrderBookEntry {
            entry_type: 0,
            rate: 0.25,
            quantity: 1.0,
        });
        history.push(d);

        assert_eq!(history.max_rate(), Some(0.25));
        assert_eq!(MarketHistory::new(3).max_rate(), None);
    }

    #[test]
    fn test_registry_creates_histories_lazily() {
        let mut registry = MarketRegistry::new(10);
        assert!(registry.history("BTC-XVG").is_none());

        registry.record(delta("BTC-XVG", &[0.1]));
        registry.record(delta("BTC-NEO", &[0.2]));

        assert_eq!(registry.market_count(), 2);
        assert_eq!(registry.history("BTC-XVG").unwrap().len(), 1);
        assert_eq!(registry.latest_min_fill_rate("BTC-NEO"), Some(0.2));
    }

    #[test]
    fn test_registry_enforces_window_len() {
        let mut registry = MarketRegistry::new(2);
        for i in 0..4 {
            registry.record(delta("BTC-XVG", &[i as f64]));
        }
        assert_eq!(registry.history("BTC-XVG").unwrap().len(), 2);
    }
}
