//! CLI command implementations

use anyhow::Result;
use dialoguer::{Confirm, Input};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::{BittrexGateway, ExchangeGateway};
use crate::stream::{MarketEvent, MarketStreamClient};
use crate::tracker::{MarketRegistry, SlidingWindowTracker};
use crate::trade::{ChunkResult, ChunkedExecutionCoordinator};

/// Run the full pipeline: track, resolve, confirm, trade
pub async fn trade(config: &Config, market: Option<String>, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Running in DRY-RUN mode - no real orders will be placed");
    }

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BittrexGateway::new(&config.exchange)?);
    let schedule = config.signal.schedule()?;
    info!(
        "Signal expected at {}, buys cancel after {}",
        schedule.signal_time, schedule.buy_deadline
    );

    // Show available funds before asking for an amount
    let balance = gateway.get_balance(&config.trade.source_currency).await?;
    println!(
        "\nAvailable balance: {} {}",
        balance.available, config.trade.source_currency
    );

    let source_amount: f64 = Input::new()
        .with_prompt(format!(
            "Amount of {} to spend",
            config.trade.source_currency
        ))
        .validate_with(|input: &f64| {
            if input.is_finite() && *input > 0.0 {
                Ok(())
            } else {
                Err("amount must be a positive number")
            }
        })
        .interact_text()?;

    if source_amount > balance.available {
        anyhow::bail!(
            "Amount {} exceeds available balance {}",
            source_amount,
            balance.available
        );
    }

    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Spend {} {} across {} chunks when a market resolves?",
            source_amount, config.trade.source_currency, config.trade.chunk_count
        ))
        .default(false)
        .interact()?;
    if !confirmed {
        info!("Trade cancelled by user");
        return Ok(());
    }

    let registry = MarketRegistry::shared(config.tracker.window_len);
    let market = match market {
        Some(market) => {
            info!("Market {} supplied on the command line, skipping detection", market);
            let events = subscribe(config, &gateway, Some(market.clone())).await?;
            drain_into_registry(events, Arc::clone(&registry));
            market
        }
        None => {
            let resolved = resolve_market(config, &gateway, &registry).await?;

            // Last chance to redirect the trade before orders go out
            let override_market: String = Input::new()
                .with_prompt(format!(
                    "Resolved {}. Press enter to accept or type another market",
                    resolved
                ))
                .allow_empty(true)
                .interact_text()?;
            if override_market.trim().is_empty() {
                resolved
            } else {
                let market = override_market.trim().to_string();
                warn!("Overriding resolved market with {}", market);
                market
            }
        }
    };

    if dry_run {
        info!(
            "DRY-RUN: would execute {} {} on {} in {} chunks",
            source_amount, config.trade.source_currency, market, config.trade.chunk_count
        );
        return Ok(());
    }

    let coordinator = ChunkedExecutionCoordinator::new(
        Arc::clone(&gateway),
        registry,
        config.trade.clone(),
        config.buy.clone(),
        config.sell.clone(),
        schedule,
    );
    let results = coordinator.execute(&market, source_amount).await?;
    report(&results);
    Ok(())
}

/// Watch the delta stream and report the resolved market without trading
pub async fn track(config: &Config) -> Result<()> {
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BittrexGateway::new(&config.exchange)?);
    let registry = MarketRegistry::shared(config.tracker.window_len);

    let market = resolve_market(config, &gateway, &registry).await?;
    println!("\nResolved market: {}", market);
    Ok(())
}

/// Show the available balance of the source currency
pub async fn balance(config: &Config) -> Result<()> {
    let gateway = BittrexGateway::new(&config.exchange)?;
    let balance = gateway.get_balance(&config.trade.source_currency).await?;
    println!("{}: {} available", balance.currency, balance.available);
    Ok(())
}

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("Exchange API: {}", config.exchange.api_url);
    println!("Stream: {}", config.stream.ws_url);
    println!(
        "Trade: {} chunks of {}, commission {}, precision {}",
        config.trade.chunk_count,
        config.trade.source_currency,
        config.trade.commission_rate,
        config.trade.currency_precision
    );
    println!(
        "Signal: {} UTC (buy deadline +{}s, sell rounds +{}s/+{}s)",
        config.signal.time,
        config.signal.buy_deadline_offset_secs,
        config.signal.sell_first_round_offset_secs,
        config.signal.sell_later_rounds_offset_secs
    );
    println!(
        "Tracker: window {}, potential > {}, prebump > {}, pre-signal ratio {}",
        config.tracker.window_len,
        config.tracker.potential_fill_limit,
        config.tracker.prebump_fill_limit,
        config.tracker.pre_signal_fill_ratio
    );
    Ok(())
}

/// Subscribe to deltas and run the tracker until a market resolves.
async fn resolve_market(
    config: &Config,
    gateway: &Arc<dyn ExchangeGateway>,
    registry: &crate::tracker::SharedRegistry,
) -> Result<String> {
    let mut events = subscribe(config, gateway, None).await?;

    let schedule = config.signal.schedule()?;
    let mut tracker = SlidingWindowTracker::new(
        config.tracker.clone(),
        schedule.signal_time,
        Arc::clone(registry),
    );

    info!("Tracking deltas until a market resolves...");
    let market = tracker.run(&mut events).await?;

    drain_into_registry(events, Arc::clone(registry));
    Ok(market)
}

/// Keep recording deltas in the background so chunk tasks price against
/// fresh data after the tracker hands off.
fn drain_into_registry(
    mut events: mpsc::Receiver<MarketEvent>,
    registry: crate::tracker::SharedRegistry,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let MarketEvent::Delta(delta) = event {
                registry.write().await.record(delta);
            }
        }
    });
}

/// Connect the stream for either every source-currency market or one
/// explicit market, returning the event channel.
async fn subscribe(
    config: &Config,
    gateway: &Arc<dyn ExchangeGateway>,
    only_market: Option<String>,
) -> Result<mpsc::Receiver<MarketEvent>> {
    let markets = match only_market {
        Some(market) => vec![market],
        None => {
            let prefix = format!("{}-", config.trade.source_currency);
            let markets: Vec<String> = gateway
                .get_market_summaries()
                .await?
                .into_iter()
                .map(|summary| summary.market_name)
                .filter(|name| name.starts_with(&prefix))
                .collect();
            if markets.is_empty() {
                anyhow::bail!("No {} markets found to subscribe to", prefix);
            }
            markets
        }
    };
    info!("Subscribing to {} markets", markets.len());

    let (event_tx, event_rx) = mpsc::channel(1024);
    let client = MarketStreamClient::new(config.stream.clone(), event_tx);
    client.start(markets);
    Ok(event_rx)
}

/// Print the per-chunk summary after execution.
fn report(results: &[ChunkResult]) {
    println!("\n=== TRADE RESULTS ===\n");
    for (index, result) in results.iter().enumerate() {
        match result {
            ChunkResult::Completed { bought, sold } => {
                println!("Chunk {}: bought {}, sold {}", index, bought, sold)
            }
            ChunkResult::PartiallySold { bought, remaining } => {
                println!(
                    "Chunk {}: bought {}, {} left unsold",
                    index, bought, remaining
                )
            }
            ChunkResult::NothingBought => println!("Chunk {}: nothing bought", index),
            ChunkResult::Failed(reason) => println!("Chunk {}: failed ({})", index, reason),
        }
    }
}
