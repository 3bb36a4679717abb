//! Pump detection over the live delta stream
//!
//! A market is worth trading only when its activity spikes *after* the
//! anticipated signal time. A single snapshot cannot tell "was already
//! moving" apart from "moved right at the signal", so the tracker keeps a
//! bounded window of deltas per market and looks backward across the
//! signal boundary before flagging anything.

pub mod history;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::stream::{MarketDelta, MarketEvent};

pub use history::{MarketHistory, MarketRegistry, SharedRegistry};

/// Sliding-window pump detector
pub struct SlidingWindowTracker {
    registry: SharedRegistry,
    config: TrackerConfig,
    signal_time: DateTime<Utc>,
    /// Markets whose activity spike was already examined this session.
    /// Write-once: a market is never re-evaluated after it trips the
    /// activity threshold, whether or not it passed the other gates.
    flagged: HashSet<String>,
    resolved: Option<String>,
}

impl SlidingWindowTracker {
    pub fn new(
        config: TrackerConfig,
        signal_time: DateTime<Utc>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            registry,
            config,
            signal_time,
            flagged: HashSet::new(),
            resolved: None,
        }
    }

    /// The market resolved so far, if any.
    pub fn resolved(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    /// Record a delta and evaluate its market.
    ///
    /// Returns the market name the first time a market passes every gate;
    /// all later evaluations return `None` (first-match-wins).
    pub async fn observe(&mut self, delta: MarketDelta) -> Option<String> {
        let market = delta.market_name.clone();
        let registry = Arc::clone(&self.registry);
        registry.write().await.record(delta);
        self.evaluate(&market).await
    }

    /// Apply the detection gates to a market's current history.
    pub async fn evaluate(&mut self, market: &str) -> Option<String> {
        if self.resolved.is_some() || self.flagged.contains(market) {
            return None;
        }

        let registry = Arc::clone(&self.registry);
        let registry = registry.read().await;
        let history = registry.history(market)?;
        let latest = history.latest()?;

        // Activity threshold: not enough fills means nothing to examine,
        // and the market stays eligible for later deltas
        if latest.fills.len() <= self.config.potential_fill_limit {
            return None;
        }
        self.flagged.insert(market.to_string());
        debug!(
            "{} flagged with {} fills, checking legitimacy",
            market,
            latest.fills.len()
        );

        // Temporal legitimacy: activity recorded before the signal, or
        // dominated by pre-signal fills, is noise
        if latest.received_at < self.signal_time {
            debug!("{} spiked before the signal time, rejected", market);
            return None;
        }
        if latest.is_mostly_pre_signal(self.signal_time, self.config.pre_signal_fill_ratio) {
            debug!("{} fills are mostly pre-signal, rejected", market);
            return None;
        }

        // Pre-bump rejection: a market that already showed bump behavior
        // before the signal was moving on its own
        for earlier in history.older_newest_first() {
            if earlier.fills.len() <= self.config.prebump_fill_limit {
                continue;
            }
            if earlier.received_at < self.signal_time
                || earlier
                    .is_mostly_pre_signal(self.signal_time, self.config.pre_signal_fill_ratio)
            {
                debug!("{} bumped before the signal, rejected", market);
                return None;
            }
        }

        info!("{} resolved as the potential market", market);
        self.resolved = Some(market.to_string());
        self.resolved.clone()
    }

    /// Consume stream events until a market resolves.
    pub async fn run(&mut self, events: &mut mpsc::Receiver<MarketEvent>) -> Result<String> {
        while let Some(event) = events.recv().await {
            match event {
                MarketEvent::Delta(delta) => {
                    if let Some(market) = self.observe(delta).await {
                        return Ok(market);
                    }
                }
                MarketEvent::Connected => info!("Tracking market deltas"),
                MarketEvent::Disconnected => warn!("Stream disconnected, waiting for reconnect"),
                MarketEvent::Error(message) => {
                    return Err(Error::StreamConnection(message));
                }
            }
        }
        Err(Error::StreamDisconnected)
    }
}
