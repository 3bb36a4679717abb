//! Chunked concurrent trade execution
//!
//! The source amount is split into equal chunks and each chunk runs its
//! own buy-then-sell pipeline in a separate task. Chunks are isolated on
//! purpose: one chunk failing to place or fill never blocks the others.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::{BuyConfig, SellConfig, SignalSchedule, TradeConfig};
use crate::error::{Error, Result};
use crate::gateway::ExchangeGateway;
use crate::math;
use crate::tracker::SharedRegistry;
use crate::trade::lifecycle::{OrderLifecycleManager, TaskOutcome};

/// Result of one chunk's full buy-then-sell pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkResult {
    /// Bought and fully sold
    Completed { bought: f64, sold: f64 },
    /// Bought but the sell rounds ran out with a remainder
    PartiallySold { bought: f64, remaining: f64 },
    /// Nothing was bought; no sell was attempted
    NothingBought,
    /// The chunk's pipeline failed with an error
    Failed(String),
}

/// Splits the source amount into chunks and fans them out
pub struct ChunkedExecutionCoordinator {
    gateway: Arc<dyn ExchangeGateway>,
    registry: SharedRegistry,
    trade: TradeConfig,
    buy: BuyConfig,
    sell: SellConfig,
    schedule: SignalSchedule,
}

impl ChunkedExecutionCoordinator {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        registry: SharedRegistry,
        trade: TradeConfig,
        buy: BuyConfig,
        sell: SellConfig,
        schedule: SignalSchedule,
    ) -> Self {
        Self {
            gateway,
            registry,
            trade,
            buy,
            sell,
            schedule,
        }
    }

    /// Run the whole trade: split, fan out, collect per-chunk results.
    ///
    /// Validation failures surface before any order is placed. After
    /// fan-out, chunk errors are reported in the results rather than
    /// propagated, so a failing chunk cannot abort its siblings.
    pub async fn execute(&self, market: &str, source_amount: f64) -> Result<Vec<ChunkResult>> {
        if !source_amount.is_finite() || source_amount <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "source amount must be positive, got {}",
                source_amount
            )));
        }
        let chunk_count = self.trade.chunk_count;
        if chunk_count < 1 {
            return Err(Error::InvalidInput(
                "chunk_count must be at least 1".to_string(),
            ));
        }

        let chunk_amount = math::floor_to(
            source_amount / chunk_count as f64,
            self.trade.currency_precision,
        );
        if math::is_zero(chunk_amount) {
            return Err(Error::InvalidInput(format!(
                "{} {} split {} ways leaves nothing per chunk",
                source_amount, self.trade.source_currency, chunk_count
            )));
        }

        info!(
            "Executing {} chunks of {} {} on {}",
            chunk_count, chunk_amount, self.trade.source_currency, market
        );

        let mut handles = Vec::with_capacity(chunk_count as usize);
        for index in 0..chunk_count {
            let manager = OrderLifecycleManager::new(
                Arc::clone(&self.gateway),
                Arc::clone(&self.registry),
                self.trade.clone(),
                self.buy.clone(),
                self.sell.clone(),
                self.schedule,
            );
            let market = market.to_string();
            handles.push(tokio::spawn(async move {
                run_chunk(index, manager, &market, chunk_amount).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Chunk {} task panicked: {}", index, e);
                    results.push(ChunkResult::Failed(e.to_string()));
                }
            }
        }
        Ok(results)
    }
}

/// One chunk's pipeline: buy, then sell whatever the buy acquired.
async fn run_chunk(
    index: u32,
    manager: OrderLifecycleManager,
    market: &str,
    chunk_amount: f64,
) -> ChunkResult {
    info!("Chunk {} starting with {} on {}", index, chunk_amount, market);

    let fill = match manager.run_buy(market, chunk_amount).await {
        Ok(Some(fill)) if !math::is_zero(fill.quantity) => fill,
        Ok(_) => {
            warn!("Chunk {} bought nothing, skipping sell", index);
            return ChunkResult::NothingBought;
        }
        Err(e) => {
            error!("Chunk {} buy failed: {}", index, e);
            return ChunkResult::Failed(e.to_string());
        }
    };

    match manager.run_sell(market, fill.quantity).await {
        Ok(TaskOutcome::Done { filled }) => {
            info!("Chunk {} completed, sold {}", index, filled);
            ChunkResult::Completed {
                bought: fill.quantity,
                sold: filled,
            }
        }
        Ok(TaskOutcome::Exhausted { remaining }) => {
            warn!("Chunk {} left {} unsold on {}", index, remaining, market);
            ChunkResult::PartiallySold {
                bought: fill.quantity,
                remaining,
            }
        }
        Err(e) => {
            error!("Chunk {} sell failed: {}", index, e);
            ChunkResult::Failed(e.to_string())
        }
    }
}
