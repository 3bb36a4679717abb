//! Configuration loading and validation

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub buy: BuyConfig,
    #[serde(default)]
    pub sell: SellConfig,
}

/// Exchange REST API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// WebSocket market stream settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 0 = reconnect forever
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// Top-level trade plan settings
#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Source currency all markets are quoted against
    #[serde(default = "default_source_currency")]
    pub source_currency: String,
    /// Number of independent chunks the source amount is split into
    #[serde(default = "default_chunk_count")]
    pub chunk_count: u32,
    /// Exchange commission rate deducted before sizing a buy
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
    /// Decimal places all rates and quantities are floored to
    #[serde(default = "default_currency_precision")]
    pub currency_precision: u32,
}

/// Signal time and the deadlines derived from it
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Wall-clock UTC time of the anticipated event, "HH:MM"
    #[serde(default = "default_signal_time")]
    pub time: String,
    /// Buys must cancel this many seconds after the signal
    #[serde(default = "default_buy_deadline_offset")]
    pub buy_deadline_offset_secs: i64,
    /// Earliest start for the first sell round
    #[serde(default = "default_sell_first_round_offset")]
    pub sell_first_round_offset_secs: i64,
    /// Earliest start for every later sell round
    #[serde(default = "default_sell_later_rounds_offset")]
    pub sell_later_rounds_offset_secs: i64,
}

/// Sliding-window pump detection thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Max deltas retained per market (oldest evicted first)
    #[serde(default = "default_window_len")]
    pub window_len: usize,
    /// Fill count in the newest delta that marks a market potential
    #[serde(default = "default_potential_fill_limit")]
    pub potential_fill_limit: usize,
    /// Lower fill count that counts as a pre-signal bump in older deltas
    #[serde(default = "default_prebump_fill_limit")]
    pub prebump_fill_limit: usize,
    /// A delta is pre-signal noise when more than this share of its fills
    /// happened before the signal time
    #[serde(default = "default_pre_signal_fill_ratio")]
    pub pre_signal_fill_ratio: f64,
}

/// Buy-side order lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct BuyConfig {
    #[serde(default = "default_buy_rounds")]
    pub max_rounds: u32,
    /// Markup over the reference rate, aggressive to get filled fast
    #[serde(default = "default_buy_rate_step")]
    pub rate_step: f64,
    #[serde(default = "default_buy_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buy_poll_iterations")]
    pub max_poll_iterations: u32,
    #[serde(default = "default_place_attempts")]
    pub place_attempts: u32,
}

/// Sell-side order lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct SellConfig {
    #[serde(default = "default_sell_rounds")]
    pub max_rounds: u32,
    /// Round 0 prices above the max observed fill rate
    #[serde(default = "default_sell_first_rate_step")]
    pub first_round_rate_step: f64,
    /// Round 1 relaxes below the max observed fill rate
    #[serde(default = "default_sell_second_rate_step")]
    pub second_round_rate_step: f64,
    /// Rounds 2+ relax further to get rid of the remainder
    #[serde(default = "default_sell_later_rate_step")]
    pub later_rounds_rate_step: f64,
    #[serde(default = "default_sell_first_iterations")]
    pub first_round_iterations: u32,
    #[serde(default = "default_sell_later_iterations")]
    pub later_rounds_iterations: u32,
    #[serde(default = "default_sell_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_place_attempts")]
    pub place_attempts: u32,
    /// Pause before retrying a round when no valid reference rate exists
    #[serde(default = "default_invalid_rate_backoff_ms")]
    pub invalid_rate_backoff_ms: u64,
}

fn default_api_url() -> String {
    "https://bittrex.com/api/v1.1".to_string()
}
fn default_ws_url() -> String {
    "wss://socket.bittrex.com/signalr".to_string()
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_source_currency() -> String {
    "BTC".to_string()
}
fn default_chunk_count() -> u32 {
    3
}
fn default_commission_rate() -> f64 {
    0.0025
}
fn default_currency_precision() -> u32 {
    8
}
fn default_signal_time() -> String {
    "16:00".to_string()
}
fn default_buy_deadline_offset() -> i64 {
    15
}
fn default_sell_first_round_offset() -> i64 {
    20
}
fn default_sell_later_rounds_offset() -> i64 {
    30
}
fn default_window_len() -> usize {
    10
}
fn default_potential_fill_limit() -> usize {
    20
}
fn default_prebump_fill_limit() -> usize {
    12
}
fn default_pre_signal_fill_ratio() -> f64 {
    0.75
}
fn default_buy_rounds() -> u32 {
    3
}
fn default_buy_rate_step() -> f64 {
    0.1
}
fn default_buy_poll_interval_ms() -> u64 {
    50
}
fn default_buy_poll_iterations() -> u32 {
    40
}
fn default_place_attempts() -> u32 {
    3
}
fn default_sell_rounds() -> u32 {
    5
}
fn default_sell_first_rate_step() -> f64 {
    0.05
}
fn default_sell_second_rate_step() -> f64 {
    0.05
}
fn default_sell_later_rate_step() -> f64 {
    0.1
}
fn default_sell_first_iterations() -> u32 {
    40
}
fn default_sell_later_iterations() -> u32 {
    30
}
fn default_sell_poll_interval_ms() -> u64 {
    50
}
fn default_invalid_rate_backoff_ms() -> u64 {
    1_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            source_currency: default_source_currency(),
            chunk_count: default_chunk_count(),
            commission_rate: default_commission_rate(),
            currency_precision: default_currency_precision(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            time: default_signal_time(),
            buy_deadline_offset_secs: default_buy_deadline_offset(),
            sell_first_round_offset_secs: default_sell_first_round_offset(),
            sell_later_rounds_offset_secs: default_sell_later_rounds_offset(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_len: default_window_len(),
            potential_fill_limit: default_potential_fill_limit(),
            prebump_fill_limit: default_prebump_fill_limit(),
            pre_signal_fill_ratio: default_pre_signal_fill_ratio(),
        }
    }
}

impl Default for BuyConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_buy_rounds(),
            rate_step: default_buy_rate_step(),
            poll_interval_ms: default_buy_poll_interval_ms(),
            max_poll_iterations: default_buy_poll_iterations(),
            place_attempts: default_place_attempts(),
        }
    }
}

impl Default for SellConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_sell_rounds(),
            first_round_rate_step: default_sell_first_rate_step(),
            second_round_rate_step: default_sell_second_rate_step(),
            later_rounds_rate_step: default_sell_later_rate_step(),
            first_round_iterations: default_sell_first_iterations(),
            later_rounds_iterations: default_sell_later_iterations(),
            poll_interval_ms: default_sell_poll_interval_ms(),
            place_attempts: default_place_attempts(),
            invalid_rate_backoff_ms: default_invalid_rate_backoff_ms(),
        }
    }
}

/// All wall-clock times derived from the configured signal time.
///
/// Everything downstream works with these absolute timestamps rather than
/// re-deriving offsets.
#[derive(Debug, Clone, Copy)]
pub struct SignalSchedule {
    pub signal_time: DateTime<Utc>,
    pub buy_deadline: DateTime<Utc>,
    pub sell_first_round_start: DateTime<Utc>,
    pub sell_later_rounds_start: DateTime<Utc>,
}

impl SignalConfig {
    /// Resolve the configured "HH:MM" time against today's UTC date.
    pub fn schedule(&self) -> Result<SignalSchedule> {
        let time = NaiveTime::parse_from_str(&self.time, "%H:%M")
            .with_context(|| format!("Invalid signal time '{}', expected HH:MM", self.time))?;
        let signal_time = Utc::now()
            .date_naive()
            .and_time(time)
            .and_utc();
        Ok(self.schedule_at(signal_time))
    }

    /// Build the schedule around an explicit signal timestamp.
    pub fn schedule_at(&self, signal_time: DateTime<Utc>) -> SignalSchedule {
        SignalSchedule {
            signal_time,
            buy_deadline: signal_time + Duration::seconds(self.buy_deadline_offset_secs),
            sell_first_round_start: signal_time
                + Duration::seconds(self.sell_first_round_offset_secs),
            sell_later_rounds_start: signal_time
                + Duration::seconds(self.sell_later_rounds_offset_secs),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix PUMPTRADER_)
            .add_source(
                config::Environment::with_prefix("PUMPTRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.trade.chunk_count < 1 {
            anyhow::bail!("chunk_count must be at least 1");
        }

        if self.trade.commission_rate < 0.0 || self.trade.commission_rate >= 1.0 {
            anyhow::bail!("commission_rate must be in [0, 1)");
        }

        if self.trade.currency_precision > 12 {
            anyhow::bail!("currency_precision cannot exceed 12 decimal places");
        }

        if self.tracker.window_len < 2 {
            anyhow::bail!("tracker window_len must hold at least 2 deltas");
        }

        if self.tracker.pre_signal_fill_ratio <= 0.0 || self.tracker.pre_signal_fill_ratio > 1.0 {
            anyhow::bail!("pre_signal_fill_ratio must be in (0, 1]");
        }

        if self.tracker.prebump_fill_limit > self.tracker.potential_fill_limit {
            anyhow::bail!("prebump_fill_limit cannot exceed potential_fill_limit");
        }

        if self.buy.max_rounds == 0 || self.sell.max_rounds == 0 {
            anyhow::bail!("max_rounds must be at least 1 for both sides");
        }

        if self.buy.place_attempts == 0 || self.sell.place_attempts == 0 {
            anyhow::bail!("place_attempts must be at least 1");
        }

        // Surface a bad signal time at startup, not mid-trade
        self.signal.schedule()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config {
            exchange: ExchangeConfig::default(),
            stream: StreamConfig::default(),
            trade: TradeConfig::default(),
            signal: SignalConfig::default(),
            tracker: TrackerConfig::default(),
            buy: BuyConfig::default(),
            sell: SellConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[trade]\nchunk_count = 5\n\n[tracker]\nwindow_len = 15\npotential_fill_limit = 25"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.trade.chunk_count, 5);
        assert_eq!(config.tracker.window_len, 15);
        assert_eq!(config.tracker.potential_fill_limit, 25);
        // Untouched fields keep their defaults
        assert_eq!(config.trade.currency_precision, 8);
        assert_eq!(config.sell.max_rounds, 5);
    }

    #[test]
    fn test_invalid_chunk_count_rejected() {
        let mut config = Config::load("/nonexistent.toml").unwrap();
        config.trade.chunk_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_signal_time_rejected() {
        let mut config = Config::load("/nonexistent.toml").unwrap();
        config.signal.time = "25:99".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_offsets() {
        let signal = Utc.with_ymd_and_hms(2017, 11, 5, 16, 0, 0).unwrap();
        let schedule = SignalConfig::default().schedule_at(signal);

        assert_eq!(schedule.signal_time, signal);
        assert_eq!(schedule.buy_deadline, signal + Duration::seconds(15));
        assert_eq!(schedule.sell_first_round_start, signal + Duration::seconds(20));
        assert_eq!(schedule.sell_later_rounds_start, signal + Duration::seconds(30));
    }
}
