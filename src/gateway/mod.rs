//! Exchange gateway abstraction
//!
//! The trading core only talks to an exchange through this trait, so the
//! order lifecycle and coordinator can be exercised against a scripted
//! gateway in tests.

pub mod bittrex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use bittrex::BittrexGateway;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Exchange-reported state of a single order
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: String,
    pub is_open: bool,
    pub closed_at: Option<DateTime<Utc>>,
    /// Quantity originally requested
    pub quantity: f64,
    /// Quantity not yet filled
    pub quantity_remaining: f64,
    /// Average fill price, if anything filled
    pub price_per_unit: Option<f64>,
}

impl OrderStatus {
    /// The exchange reports closure either through the timestamp or the
    /// open flag; either one counts.
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some() || !self.is_open
    }

    pub fn filled_quantity(&self) -> f64 {
        self.quantity - self.quantity_remaining
    }
}

/// Best bid/ask/last for a market
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// One entry of the periodic full-snapshot feed
#[derive(Debug, Clone)]
pub struct MarketSummary {
    pub market_name: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// Account balance for one currency
#[derive(Debug, Clone)]
pub struct Balance {
    pub currency: String,
    pub available: f64,
}

/// Request/response surface the core requires from an exchange.
///
/// Implementations must map a refused placement to `Error::OrderRejected`
/// and a refused cancellation to `Error::CancelFailed`; the order
/// lifecycle special-cases both.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place a limit order, returning the exchange-assigned order id.
    async fn place_order(&self, market: &str, side: Side, quantity: f64, rate: f64)
        -> Result<String>;

    /// Cancel an open order.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Fetch the current state of an order.
    async fn get_order(&self, order_id: &str) -> Result<OrderStatus>;

    /// Fetch the current ticker for a market.
    async fn get_ticker(&self, market: &str) -> Result<Ticker>;

    /// Fetch the full market snapshot.
    async fn get_market_summaries(&self) -> Result<Vec<MarketSummary>>;

    /// Fetch the available balance for a currency.
    async fn get_balance(&self, currency: &str) -> Result<Balance>;
}
