//! Order lifecycle state machine
//!
//! One manager drives a single buy or sell through bounded re-pricing
//! rounds: PRICING -> PLACING -> MONITORING -> CANCELLING -> SETTLING.
//! A round ends when its order closes, its poll budget runs out, or a
//! wall-clock deadline passes; leftover quantity carries into the next
//! round at a freshly computed rate.
//!
//! Cancellation and a final fill can race at the exchange. A refused
//! cancel almost always means the order closed between the last poll and
//! the cancel attempt, so cancel failure is treated as success and the
//! settling re-fetch decides the real outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{BuyConfig, SellConfig, SignalSchedule, TradeConfig};
use crate::error::{Error, Result};
use crate::gateway::{ExchangeGateway, OrderStatus, Side};
use crate::math;
use crate::tracker::SharedRegistry;
use crate::trade::poll::{wait_until, PollClock, PollTick};

/// Terminal outcome of a chunk-side task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Fully filled across one or more rounds
    Done { filled: f64 },
    /// Round budget exhausted; the remainder is abandoned by design
    Exhausted { remaining: f64 },
}

/// What a buy chunk managed to acquire
#[derive(Debug, Clone, Copy)]
pub struct BuyFill {
    pub quantity: f64,
    pub rate: f64,
}

/// Everything one round needs after pricing
#[derive(Debug, Clone)]
struct RoundPlan {
    side: Side,
    rate: f64,
    quantity: f64,
    poll_interval: Duration,
    max_iterations: u32,
    deadline: Option<chrono::DateTime<chrono::Utc>>,
    place_attempts: u32,
}

/// How a round ended
#[derive(Debug)]
enum RoundOutcome {
    /// Order placed; definitive post-round state from the settling fetch
    Settled(OrderStatus),
    /// Placement never succeeded; nothing to monitor or settle
    Abandoned,
}

/// Drives one order side for one chunk
pub struct OrderLifecycleManager {
    gateway: Arc<dyn ExchangeGateway>,
    registry: SharedRegistry,
    trade: TradeConfig,
    buy: BuyConfig,
    sell: SellConfig,
    schedule: SignalSchedule,
}

impl OrderLifecycleManager {
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

    /// Buy as much as possible with one chunk of the source currency.
    ///
    /// Returns `None` when nothing was bought. The hard buy deadline
    /// (signal + offset) wins over the round budget: once it passes, no
    /// further round starts and monitoring force-cancels, so the sell
    /// stage always gets both time and a definite filled quantity.
    pub async fn run_buy(&self, market: &str, chunk_source_amount: f64) -> Result<Option<BuyFill>> {
        let precision = self.trade.currency_precision;
        let actual_amount = math::floor_to(
            chunk_source_amount / (1.0 + self.trade.commission_rate),
            precision,
        );
        info!(
            "[BUY] Excluding commission, using {} {} for this {} chunk",
            actual_amount, self.trade.source_currency, market
        );

        // Quantity is sized once from the round-0 rate; afterwards the
        // unfilled remainder carries between rounds
        let mut carried_quantity: Option<f64> = None;
        let mut filled_total = 0.0;
        let mut fill_rate: Option<f64> = None;
        let mut last_rate = 0.0;

        for round in 0..self.buy.max_rounds {
            // The hard deadline gates every later round, including ones
            // reached by skipping a failed pricing fetch
            if round > 0 && Utc::now() > self.schedule.buy_deadline {
                warn!("[BUY] Deadline passed, no further rounds for {}", market);
                break;
            }

            // PRICING
            let reference = if round == 0 {
                match self.registry.read().await.latest_min_fill_rate(market) {
                    // A fill rate above 1 source unit is garbage data
                    Some(rate) if rate > 0.0 && rate <= 1.0 => rate,
                    _ => {
                        error!("[BUY] Invalid buy rate for {}", market);
                        return Ok(None);
                    }
                }
            } else {
                match self.gateway.get_ticker(market).await {
                    Ok(ticker) => ticker.ask,
                    Err(e) => {
                        warn!("[BUY] Ticker fetch failed in round {}: {}", round, e);
                        continue;
                    }
                }
            };

            let rate = math::floor_to(reference * (1.0 + self.buy.rate_step), precision);
            let quantity = match carried_quantity {
                Some(quantity) => quantity,
                None => math::floor_to(actual_amount / rate, precision),
            };
            if rate <= 0.0 || math::is_zero(quantity) {
                warn!("[BUY] Nothing left to buy at rate {}", rate);
                break;
            }
            last_rate = rate;

            let plan = RoundPlan {
                side: Side::Buy,
                rate,
                quantity,
                poll_interval: Duration::from_millis(self.buy.poll_interval_ms),
                max_iterations: self.buy.max_poll_iterations,
                deadline: Some(self.schedule.buy_deadline),
                place_attempts: self.buy.place_attempts,
            };
            info!(
                "[BUY] Round {}: attempting {} at rate {} on {}",
                round, quantity, rate, market
            );

            match self.execute_round(market, &plan).await? {
                RoundOutcome::Abandoned => {
                    carried_quantity = Some(quantity);
                }
                RoundOutcome::Settled(order) => {
                    let filled = order.filled_quantity().max(0.0);
                    filled_total += filled;
                    if order.price_per_unit.is_some() {
                        fill_rate = order.price_per_unit;
                    }

                    if math::is_zero(order.quantity_remaining) {
                        info!(
                            "[BUY] Completed: {} bought on {} at rate {}",
                            filled_total, market, rate
                        );
                        return Ok(Some(BuyFill {
                            quantity: filled_total,
                            rate: fill_rate.unwrap_or(last_rate),
                        }));
                    }
                    carried_quantity = Some(order.quantity_remaining);
                    warn!(
                        "[BUY] Round {} left {} unfilled on {}",
                        round, order.quantity_remaining, market
                    );
                }
            }
        }

        if math::is_zero(filled_total) {
            warn!("[BUY] Nothing bought on {}", market);
            return Ok(None);
        }
        warn!(
            "[BUY] Rounds exhausted with partial fill of {} on {}",
            filled_total, market
        );
        Ok(Some(BuyFill {
            quantity: filled_total,
            rate: fill_rate.unwrap_or(last_rate),
        }))
    }

    /// Sell a bought quantity, escalating price concessions per round.
    ///
    /// Round 0 waits for its staged start time, prices above the max
    /// observed fill rate, and hands over to round 1 as soon as the
    /// later-rounds start time passes. Later rounds price below the max
    /// observed rate to move the remainder.
    pub async fn run_sell(&self, market: &str, chunk_target_amount: f64) -> Result<TaskOutcome> {
        let precision = self.trade.currency_precision;
        let mut quantity = chunk_target_amount;

        for round in 0..self.sell.max_rounds {
            // Wait till the best time to start this round
            if round == 0 {
                if Utc::now() < self.schedule.sell_first_round_start {
                    info!("[SELL] Waiting for the first-round start time");
                    wait_until(self.schedule.sell_first_round_start).await;
                }
            } else if Utc::now() < self.schedule.sell_later_rounds_start {
                info!("[SELL] Waiting for the later-rounds start time");
                wait_until(self.schedule.sell_later_rounds_start).await;
            }

            // PRICING from the freshest observed rate
            let reference = self.registry.read().await.max_rate(market);
            let Some(reference) = reference.filter(|rate| *rate > 0.0) else {
                error!("[SELL] Invalid sell rate for {}", market);
                sleep(Duration::from_millis(self.sell.invalid_rate_backoff_ms)).await;
                continue;
            };

            let (factor, max_iterations) = match round {
                0 => (
                    1.0 + self.sell.first_round_rate_step,
                    self.sell.first_round_iterations,
                ),
                1 => (
                    1.0 - self.sell.second_round_rate_step,
                    self.sell.later_rounds_iterations,
                ),
                _ => (
                    1.0 - self.sell.later_rounds_rate_step,
                    self.sell.later_rounds_iterations,
                ),
            };
            let rate = math::floor_to(reference * factor, precision);
            if rate <= 0.0 {
                error!("[SELL] Rate collapsed to zero for {}", market);
                sleep(Duration::from_millis(self.sell.invalid_rate_backoff_ms)).await;
                continue;
            }

            // Round 0 must not outstay the later-rounds start time
            let deadline = if round == 0 {
                Some(self.schedule.sell_later_rounds_start)
            } else {
                None
            };

            let plan = RoundPlan {
                side: Side::Sell,
                rate,
                quantity,
                poll_interval: Duration::from_millis(self.sell.poll_interval_ms),
                max_iterations,
                deadline,
                place_attempts: self.sell.place_attempts,
            };
            info!(
                "[SELL] Round {}: attempting {} at rate {} on {}",
                round, quantity, rate, market
            );

            match self.execute_round(market, &plan).await? {
                RoundOutcome::Abandoned => continue,
                RoundOutcome::Settled(order) => {
                    if math::is_zero(order.quantity_remaining) {
                        info!("[SELL] Completed: {} sold on {}", chunk_target_amount, market);
                        return Ok(TaskOutcome::Done {
                            filled: chunk_target_amount,
                        });
                    }
                    quantity = order.quantity_remaining;
                    warn!(
                        "[SELL] Round {} left {} unsold on {}",
                        round, quantity, market
                    );
                }
            }
        }

        warn!(
            "[SELL] Rounds exhausted with {} unsold on {}",
            quantity, market
        );
        Ok(TaskOutcome::Exhausted {
            remaining: quantity,
        })
    }

    /// PLACING -> MONITORING -> CANCELLING -> SETTLING for one round.
    async fn execute_round(&self, market: &str, plan: &RoundPlan) -> Result<RoundOutcome> {
        // PLACING, with bounded retries
        let mut order_id = None;
        for attempt in 0..plan.place_attempts {
            match self
                .gateway
                .place_order(market, plan.side, plan.quantity, plan.rate)
                .await
            {
                Ok(id) => {
                    order_id = Some(id);
                    break;
                }
                Err(e) => warn!(
                    "[{}] Placement attempt {} failed: {}",
                    plan.side,
                    attempt + 1,
                    e
                ),
            }
        }
        let Some(order_id) = order_id else {
            warn!("[{}] Abandoning round, placement never succeeded", plan.side);
            return Ok(RoundOutcome::Abandoned);
        };

        // MONITORING
        let mut clock = PollClock::new(plan.poll_interval, plan.max_iterations, plan.deadline);
        let mut remaining = plan.quantity;
        let mut stuck_polls = 0u32;
        let mut closed = false;

        loop {
            match clock.tick().await {
                PollTick::Proceed { iteration } => {
                    debug!(
                        "[{}] Fetching order {} (poll {})",
                        plan.side,
                        order_id,
                        iteration + 1
                    );
                    let order = match self.gateway.get_order(&order_id).await {
                        Ok(order) => order,
                        Err(e) => {
                            warn!("[{}] Order fetch failed: {}", plan.side, e);
                            continue;
                        }
                    };

                    if order.is_closed() {
                        info!(
                            "[{}] Order {} closed at rate {}",
                            plan.side, order_id, plan.rate
                        );
                        closed = true;
                        break;
                    }
                    if !math::approx_eq(remaining, order.quantity_remaining) {
                        remaining = order.quantity_remaining;
                        stuck_polls = 0;
                        info!(
                            "[{}] Partially filled, {} of {} remaining",
                            plan.side, remaining, plan.quantity
                        );
                    } else {
                        // Diagnostics only; the deadline governs exit
                        stuck_polls += 1;
                        debug!(
                            "[{}] Stuck at {} remaining for {} polls",
                            plan.side, remaining, stuck_polls
                        );
                    }
                }
                PollTick::DeadlineExceeded => {
                    warn!(
                        "[{}] Deadline passed while monitoring {}, cancelling asap",
                        plan.side, order_id
                    );
                    break;
                }
                PollTick::Exhausted => {
                    warn!(
                        "[{}] Poll budget exhausted for {}, cancelling",
                        plan.side, order_id
                    );
                    break;
                }
            }
        }

        // CANCELLING; a refused cancel means the order already closed
        if !closed {
            match self.gateway.cancel_order(&order_id).await {
                Ok(()) => info!("[{}] Cancelled order {}", plan.side, order_id),
                Err(Error::CancelFailed(_)) => info!(
                    "[{}] Cancel refused for {}, order closed under us",
                    plan.side, order_id
                ),
                Err(e) => warn!("[{}] Cancel error for {}: {}", plan.side, order_id, e),
            }
        }

        // SETTLING: one confirming re-fetch decides the round outcome
        let order = self.fetch_settled(&order_id).await?;
        Ok(RoundOutcome::Settled(order))
    }

    /// Re-fetch an order after a round ends, retrying transient failures.
    async fn fetch_settled(&self, order_id: &str) -> Result<OrderStatus> {
        let mut last_err = None;
        for _ in 0..3 {
            match self.gateway.get_order(order_id).await {
                Ok(order) => return Ok(order),
                Err(e) if e.is_retryable() => {
                    warn!("Settling fetch failed for {}: {}", order_id, e);
                    last_err = Some(e);
                    sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::OrderNotFound(order_id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalConfig;
    use crate::gateway::{Balance, MarketSummary, Ticker};
    use crate::stream::{Fill, MarketDelta};
    use crate::tracker::MarketRegistry;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted gateway: placement results and per-order poll states are
    /// consumed front to back; the last state repeats forever.
    #[derive(Default)]
    struct MockGateway {
        place_results: Mutex<VecDeque<Result<String>>>,
        cancel_results: Mutex<VecDeque<Result<()>>>,
        order_states: Mutex<HashMap<String, VecDeque<OrderStatus>>>,
        tickers: Mutex<VecDeque<Ticker>>,
        placed: Mutex<Vec<(Side, f64, f64)>>,
        poll_count: AtomicU32,
        ticker_calls: AtomicU32,
    }

    impl MockGateway {
        fn will_place(&self, result: Result<String>) {
            self.place_results.lock().unwrap().push_back(result);
        }

        fn will_cancel(&self, result: Result<()>) {
            self.cancel_results.lock().unwrap().push_back(result);
        }

        fn order_state(&self, order_id: &str, state: OrderStatus) {
            self.order_states
                .lock()
                .unwrap()
                .entry(order_id.to_string())
                .or_default()
                .push_back(state);
        }

        fn placed_orders(&self) -> Vec<(Side, f64, f64)> {
            self.placed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn place_order(
            &self,
            _market: &str,
            side: Side,
            quantity: f64,
            rate: f64,
        ) -> Result<String> {
            let result = self
                .place_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::OrderRejected("unscripted".to_string())));
            if result.is_ok() {
                self.placed.lock().unwrap().push((side, quantity, rate));
            }
            result
        }

        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            self.cancel_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::CancelFailed(order_id.to_string())))
        }

        async fn get_order(&self, order_id: &str) -> Result<OrderStatus> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let mut states = self.order_states.lock().unwrap();
            let queue = states
                .get_mut(order_id)
                .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue
                    .front()
                    .cloned()
                    .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
            }
        }

        async fn get_ticker(&self, _market: &str) -> Result<Ticker> {
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .tickers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ticker {
                    bid: 0.0001,
                    ask: 0.0001,
                    last: 0.0001,
                }))
        }

        async fn get_market_summaries(&self) -> Result<Vec<MarketSummary>> {
            Ok(vec![])
        }

        async fn get_balance(&self, _currency: &str) -> Result<Balance> {
            Ok(Balance {
                currency: "BTC".to_string(),
                available: 1.0,
            })
        }
    }

    fn open_order(id: &str, quantity: f64, remaining: f64) -> OrderStatus {
        OrderStatus {
            order_id: id.to_string(),
            is_open: true,
            closed_at: None,
            quantity,
            quantity_remaining: remaining,
            price_per_unit: None,
        }
    }

    fn closed_order(id: &str, quantity: f64, remaining: f64, price: f64) -> OrderStatus {
        OrderStatus {
            order_id: id.to_string(),
            is_open: false,
            closed_at: Some(Utc::now()),
            quantity,
            quantity_remaining: remaining,
            price_per_unit: Some(price),
        }
    }

    fn schedule_around(signal: DateTime<Utc>) -> SignalSchedule {
        SignalConfig::default().schedule_at(signal)
    }

    /// Manager with fast polling, schedule in the recent past so sell
    /// rounds never wait, and the buy deadline still ahead.
    fn manager(
        gateway: Arc<MockGateway>,
        registry: SharedRegistry,
        schedule: SignalSchedule,
    ) -> OrderLifecycleManager {
        let buy = BuyConfig {
            max_rounds: 3,
            rate_step: 0.1,
            poll_interval_ms: 1,
            max_poll_iterations: 5,
            place_attempts: 2,
        };
        let sell = SellConfig {
            max_rounds: 3,
            first_round_rate_step: 0.05,
            second_round_rate_step: 0.05,
            later_rounds_rate_step: 0.1,
            first_round_iterations: 5,
            later_rounds_iterations: 5,
            poll_interval_ms: 1,
            place_attempts: 2,
            invalid_rate_backoff_ms: 1,
        };
        OrderLifecycleManager::new(
            gateway,
            registry,
            TradeConfig::default(),
            buy,
            sell,
            schedule,
        )
    }

    async fn registry_with_rate(market: &str, rate: f64) -> SharedRegistry {
        let registry = MarketRegistry::shared(10);
        registry.write().await.record(MarketDelta {
            market_name: market.to_string(),
            fills: vec![Fill {
                order_type: "BUY".to_string(),
                rate,
                quantity: 100.0,
                time_stamp: Utc::now(),
            }],
            buys: vec![],
            sells: vec![],
            received_at: Utc::now(),
        });
        registry
    }

    #[tokio::test]
    async fn test_buy_completes_in_first_round() {
        let gateway = Arc::new(MockGateway::default());
        gateway.will_place(Ok("o1".to_string()));
        gateway.order_state("o1", closed_order("o1", 909.0, 0.0, 0.00011));

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        // Sell windows in the past, buy deadline well ahead
        let schedule = schedule_around(Utc::now() + ChronoDuration::seconds(60));
        let manager = manager(gateway.clone(), registry, schedule);

        let fill = manager.run_buy("BTC-XVG", 0.1).await.unwrap().unwrap();
        assert_eq!(fill.quantity, 909.0);
        assert_eq!(fill.rate, 0.00011);

        // Round 0 priced off the window's min fill rate plus the step
        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].0, Side::Buy);
        assert_eq!(placed[0].2, math::floor_to(0.0001 * 1.1, 8));
    }

    #[tokio::test]
    async fn test_buy_without_reference_rate_buys_nothing() {
        let gateway = Arc::new(MockGateway::default());
        let registry = MarketRegistry::shared(10);
        let schedule = schedule_around(Utc::now() + ChronoDuration::seconds(60));
        let manager = manager(gateway.clone(), registry, schedule);

        let fill = manager.run_buy("BTC-XVG", 0.1).await.unwrap();
        assert!(fill.is_none());
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_sell_carries_remainder_into_next_round() {
        let gateway = Arc::new(MockGateway::default());
        // Round 0: fills 40 of 100, then sticks until the budget runs out
        gateway.will_place(Ok("o1".to_string()));
        gateway.order_state("o1", open_order("o1", 100.0, 60.0));
        gateway.will_cancel(Ok(()));
        // Round 1: the leftover 60 fills completely
        gateway.will_place(Ok("o2".to_string()));
        gateway.order_state("o2", closed_order("o2", 60.0, 0.0, 0.0001));

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        // Whole schedule in the past: no waiting, round 0 deadline passed
        let schedule = schedule_around(Utc::now() - ChronoDuration::seconds(120));
        let manager = manager(gateway.clone(), registry, schedule);

        let outcome = manager.run_sell("BTC-XVG", 100.0).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done { filled: 100.0 });

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 2);
        // The second placement was sized by the settling fetch
        assert_eq!(placed[1].1, 60.0);
    }

    #[tokio::test]
    async fn test_sell_exhausts_rounds_with_remainder() {
        let gateway = Arc::new(MockGateway::default());
        for id in ["o1", "o2", "o3"] {
            gateway.will_place(Ok(id.to_string()));
            gateway.order_state(id, open_order(id, 100.0, 100.0));
            gateway.will_cancel(Ok(()));
        }

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        let schedule = schedule_around(Utc::now() - ChronoDuration::seconds(120));
        let manager = manager(gateway.clone(), registry, schedule);

        let outcome = manager.run_sell("BTC-XVG", 100.0).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Exhausted { remaining: 100.0 });
        // Round budget respected: exactly three placements
        assert_eq!(gateway.placed_orders().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_placement_skips_polling() {
        let gateway = Arc::new(MockGateway::default());
        // Every attempt of every round is rejected

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        let schedule = schedule_around(Utc::now() - ChronoDuration::seconds(120));
        let manager = manager(gateway.clone(), registry, schedule);

        let outcome = manager.run_sell("BTC-XVG", 100.0).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Exhausted { remaining: 100.0 });
        // No order ever existed, so nothing was polled
        assert_eq!(gateway.poll_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_refusal_treated_as_closed() {
        let gateway = Arc::new(MockGateway::default());
        gateway.will_place(Ok("o1".to_string()));
        // Stays open through the whole poll budget...
        gateway.order_state("o1", open_order("o1", 100.0, 100.0));
        gateway.will_cancel(Err(Error::CancelFailed("o1".to_string())));

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        // Round 0 starts immediately but its deadline is still ahead, so
        // the full poll budget runs before the cancel attempt
        let now = Utc::now();
        let schedule = SignalSchedule {
            signal_time: now - ChronoDuration::seconds(120),
            buy_deadline: now - ChronoDuration::seconds(105),
            sell_first_round_start: now - ChronoDuration::seconds(100),
            sell_later_rounds_start: now + ChronoDuration::seconds(60),
        };
        let manager = manager(gateway.clone(), registry.clone(), schedule);

        // ...but the settling fetch reveals it closed during cancellation
        {
            let mut states = gateway.order_states.lock().unwrap();
            let queue = states.get_mut("o1").unwrap();
            // Budget is 5 polls; queue open states for those, closed after
            let open = queue.front().cloned().unwrap();
            for _ in 0..4 {
                queue.push_back(open.clone());
            }
            queue.push_back(closed_order("o1", 100.0, 0.0, 0.0001));
        }

        let outcome = manager.run_sell("BTC-XVG", 100.0).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Done { filled: 100.0 });
    }

    #[tokio::test]
    async fn test_buy_deadline_stops_rounds() {
        let gateway = Arc::new(MockGateway::default());
        gateway.will_place(Ok("o1".to_string()));
        // Partial fill that never completes
        gateway.order_state("o1", open_order("o1", 909.0, 500.0));
        gateway.will_cancel(Ok(()));

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        // Buy deadline already passed: monitoring exits immediately and no
        // second round starts despite max_rounds = 3
        let schedule = schedule_around(Utc::now() - ChronoDuration::seconds(120));
        let manager = manager(gateway.clone(), registry, schedule);

        let fill = manager.run_buy("BTC-XVG", 0.1).await.unwrap().unwrap();
        assert_eq!(fill.quantity, 909.0 - 500.0);
        assert_eq!(gateway.placed_orders().len(), 1);
        // Deadline beat the poll budget: only the settling fetch ran
        assert_eq!(gateway.poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_buy_rounds_never_price_after_deadline() {
        let gateway = Arc::new(MockGateway::default());
        gateway.will_place(Ok("o1".to_string()));
        gateway.order_state("o1", open_order("o1", 909.0, 500.0));
        gateway.will_cancel(Ok(()));

        let registry = registry_with_rate("BTC-XVG", 0.0001).await;
        let schedule = schedule_around(Utc::now() - ChronoDuration::seconds(120));
        let manager = manager(gateway.clone(), registry, schedule);

        manager.run_buy("BTC-XVG", 0.1).await.unwrap();

        // Later rounds are gated before pricing: no ticker fetch, no
        // second placement, despite max_rounds = 3 and a carried remainder
        assert_eq!(gateway.placed_orders().len(), 1);
        assert_eq!(gateway.ticker_calls.load(Ordering::SeqCst), 0);
    }
}
