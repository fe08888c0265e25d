//! The grid-trading driver: resting buy orders across a price range, each
//! fill answered with a counter-order one level away.
//!
//! Fill detection is poll-and-diff against the venue's open-order list; a
//! tracked open order that is no longer on the venue has filled. Counter
//! placement is idempotent across polls: a fill is recorded as paired only
//! once its counter-order is accepted, so a failed placement retries on the
//! next poll and a successful one is never duplicated.

use crate::error::ExecutionError;
use crate::normalize::Normalizer;
use crate::registry::CampaignRegistry;
use crate::util::wait_cancellable;
use api_client::ExchangeConnector;
use configuration::ExecutionSettings;
use core_types::{MarketKind, OrderRequest, OrderSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pause between initial grid placements.
const LEVEL_PLACE_DELAY: Duration = Duration::from_millis(500);
/// How long `stop` waits for the monitor task before detaching.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct GridParams {
    pub symbol: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub num_levels: usize,
    /// Capital allocated to the grid; the profit-target percentages are
    /// measured against it.
    pub total_investment: Decimal,
    pub market: MarketKind,
    pub leverage: u8,
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridStatus {
    Created,
    Active,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridOrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// One order the grid is tracking, live or historical.
#[derive(Debug, Clone, Serialize)]
pub struct GridOrder {
    pub order_id: u64,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub status: GridOrderStatus,
    /// The fill this order was placed in answer to, if any.
    pub paired_with: Option<u64>,
}

/// One registered grid campaign.
pub struct GridCampaign {
    pub params: GridParams,
    pub level_spacing: Decimal,
    pub investment_per_level: Decimal,
    pub levels: Vec<Decimal>,
    cancelled: AtomicBool,
    runtime: Mutex<GridRuntime>,
}

struct GridRuntime {
    status: GridStatus,
    current_price: Option<Decimal>,
    orders: Vec<GridOrder>,
    /// Fill ids whose counter-order has been accepted (or ruled out). The
    /// gate that makes counter placement exactly-once.
    paired_fills: HashSet<u64>,
    realized_pnl: Decimal,
    buy_fills: u32,
    sell_fills: u32,
    take_profit_pct: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
    last_error: Option<String>,
    monitor: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridSnapshot {
    pub id: String,
    pub symbol: String,
    pub status: GridStatus,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub num_levels: usize,
    pub level_spacing: Decimal,
    pub investment_per_level: Decimal,
    pub levels: Vec<Decimal>,
    pub current_price: Option<Decimal>,
    pub open_orders: usize,
    pub buy_fills: u32,
    pub sell_fills: u32,
    pub realized_pnl: Decimal,
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub last_error: Option<String>,
}

/// What `stop` tore down.
#[derive(Debug, Clone, Serialize)]
pub struct GridStopReport {
    pub id: String,
    pub cancelled_orders: usize,
    pub failed_cancels: usize,
    pub realized_pnl: Decimal,
}

pub struct GridManager {
    connector: Arc<dyn ExchangeConnector>,
    normalizer: Normalizer,
    registry: Arc<CampaignRegistry<GridCampaign>>,
    poll_interval: Duration,
    level_size: Decimal,
}

impl GridManager {
    pub fn new(connector: Arc<dyn ExchangeConnector>, settings: &ExecutionSettings) -> Self {
        Self {
            normalizer: Normalizer::new(Arc::clone(&connector)),
            connector,
            registry: Arc::new(CampaignRegistry::new("grid")),
            poll_interval: Duration::from_secs(settings.grid_poll_secs),
            level_size: settings.grid_level_size,
        }
    }

    /// Validates the range and derives the grid geometry. No exchange traffic
    /// until `start`.
    pub async fn create(&self, params: GridParams) -> Result<String, ExecutionError> {
        if params.lower_price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParams(
                "lower price must be greater than 0".to_string(),
            ));
        }
        if params.upper_price <= params.lower_price {
            return Err(ExecutionError::InvalidParams(
                "upper price must be greater than lower price".to_string(),
            ));
        }
        if params.num_levels < 2 {
            return Err(ExecutionError::InvalidParams(
                "grid needs at least 2 levels".to_string(),
            ));
        }
        if params.total_investment <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParams(
                "total investment must be greater than 0".to_string(),
            ));
        }

        let level_spacing =
            (params.upper_price - params.lower_price) / Decimal::from((params.num_levels - 1) as u64);
        let investment_per_level = params.total_investment / Decimal::from(params.num_levels as u64);
        let mut levels: Vec<Decimal> = (0..params.num_levels)
            .map(|i| params.lower_price + level_spacing * Decimal::from(i as u64))
            .collect();
        // Pin the top level so division rounding never drifts past the range.
        levels[params.num_levels - 1] = params.upper_price;

        let runtime = GridRuntime {
            status: GridStatus::Created,
            current_price: None,
            orders: Vec::new(),
            paired_fills: HashSet::new(),
            realized_pnl: Decimal::ZERO,
            buy_fills: 0,
            sell_fills: 0,
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            last_error: None,
            monitor: None,
        };
        let campaign = GridCampaign {
            params,
            level_spacing,
            investment_per_level,
            levels,
            cancelled: AtomicBool::new(false),
            runtime: Mutex::new(runtime),
        };
        let (id, campaign) = self.registry.insert(campaign).await;
        info!(
            id,
            symbol = %campaign.params.symbol,
            levels = campaign.params.num_levels,
            spacing = %level_spacing,
            "grid campaign created"
        );
        Ok(id)
    }

    /// Places the initial buy ladder and spawns the fill monitor.
    ///
    /// Buy orders go at every level strictly below the current price; the
    /// levels at and above it stay empty until the market trades down into
    /// them through the counter-order cycle.
    pub async fn start(&self, id: &str) -> Result<GridSnapshot, ExecutionError> {
        let campaign = self
            .registry
            .get_active(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;

        {
            let mut runtime = campaign.runtime.lock().await;
            if runtime.status != GridStatus::Created {
                return Err(ExecutionError::InvalidState {
                    id: id.to_string(),
                    state: format!("{:?}", runtime.status).to_lowercase(),
                });
            }
            // Claim the campaign before any network traffic.
            runtime.status = GridStatus::Active;
        }

        let params = &campaign.params;
        let price = match self.discover_price(&params.symbol).await {
            Some(price) => price,
            None => {
                let mut runtime = campaign.runtime.lock().await;
                runtime.status = GridStatus::Error;
                runtime.last_error = Some("no price source available".to_string());
                return Err(ExecutionError::NoPrice(params.symbol.clone()));
            }
        };
        if price < params.lower_price || price > params.upper_price {
            warn!(
                id,
                %price,
                lower = %params.lower_price,
                upper = %params.upper_price,
                "current price is outside the grid range"
            );
        }

        if params.market == MarketKind::Perpetual {
            if let Err(e) = self.connector.set_leverage(&params.symbol, params.leverage).await {
                warn!(id, %e, "failed to set leverage, continuing at current setting");
            }
        }

        let size = self.normalizer.normalize_size(&params.symbol, self.level_size).await;
        let mut placed = Vec::new();
        let below: Vec<Decimal> = campaign
            .levels
            .iter()
            .copied()
            .filter(|level| *level < price)
            .collect();
        if below.is_empty() {
            warn!(id, %price, "no grid level below the current price, starting empty");
        }
        for (i, level) in below.iter().enumerate() {
            // A stop can land while the ladder is still going out; the lock
            // is not held here, so the flag is the only signal.
            if campaign.cancelled.load(Ordering::SeqCst) {
                warn!(id, "grid stopped during startup, unwinding placed orders");
                self.unwind_startup_orders(&params.symbol, &placed).await;
                return Err(ExecutionError::InvalidState {
                    id: id.to_string(),
                    state: "stopped".to_string(),
                });
            }
            let level_price = self.normalizer.normalize_price(&params.symbol, *level).await;
            let order = OrderRequest::limit(params.symbol.clone(), OrderSide::Buy, size, level_price);
            match self.connector.submit_order(&order).await {
                Ok(result) if result.accepted => {
                    if let Some(order_id) = result.order_id {
                        info!(id, order_id, price = %level_price, "grid buy placed");
                        placed.push(GridOrder {
                            order_id,
                            side: OrderSide::Buy,
                            price: level_price,
                            size,
                            status: GridOrderStatus::Open,
                            paired_with: None,
                        });
                    }
                }
                Ok(result) => {
                    warn!(id, price = %level_price, reason = ?result.error, "grid buy rejected")
                }
                Err(e) => warn!(id, price = %level_price, %e, "grid buy failed"),
            }
            if i + 1 < below.len() {
                tokio::time::sleep(LEVEL_PLACE_DELAY).await;
            }
        }

        {
            let mut runtime = campaign.runtime.lock().await;
            if campaign.cancelled.load(Ordering::SeqCst) {
                drop(runtime);
                warn!(id, "grid stopped during startup, unwinding placed orders");
                self.unwind_startup_orders(&params.symbol, &placed).await;
                return Err(ExecutionError::InvalidState {
                    id: id.to_string(),
                    state: "stopped".to_string(),
                });
            }
            runtime.current_price = Some(price);
            runtime.orders = placed;
            runtime.monitor = Some(tokio::spawn(monitor_campaign(
                Arc::clone(&self.connector),
                self.normalizer.clone(),
                Arc::clone(&campaign),
                id.to_string(),
                Arc::clone(&self.registry),
                self.poll_interval,
            )));
        }
        info!(id, "grid campaign started");
        Ok(snapshot(id, &campaign).await)
    }

    /// Stops the monitor, cancels every resting order, and promotes the
    /// campaign to completed.
    pub async fn stop(&self, id: &str) -> Result<GridStopReport, ExecutionError> {
        let campaign = self
            .registry
            .get_active(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;

        let handle = {
            let mut runtime = campaign.runtime.lock().await;
            // An errored grid can still be torn down; only a never-started or
            // already-stopped one cannot.
            if runtime.status != GridStatus::Active && runtime.status != GridStatus::Error {
                return Err(ExecutionError::InvalidState {
                    id: id.to_string(),
                    state: format!("{:?}", runtime.status).to_lowercase(),
                });
            }
            campaign.cancelled.store(true, Ordering::SeqCst);
            runtime.monitor.take()
        };

        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!(id, "grid monitor did not shut down in time, detaching");
            }
        }

        let (cancelled, failed) = cancel_resting_orders(&self.connector, &campaign).await;
        let realized_pnl = {
            let mut runtime = campaign.runtime.lock().await;
            runtime.status = GridStatus::Stopped;
            runtime.realized_pnl
        };
        self.registry.promote(id).await;
        info!(id, cancelled, failed, "grid campaign stopped");
        Ok(GridStopReport {
            id: id.to_string(),
            cancelled_orders: cancelled,
            failed_cancels: failed,
            realized_pnl,
        })
    }

    pub async fn status(&self, id: &str) -> Result<GridSnapshot, ExecutionError> {
        let (campaign, _) = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;
        Ok(snapshot(id, &campaign).await)
    }

    pub async fn list(&self) -> Vec<GridSnapshot> {
        let mut out = Vec::new();
        for (id, campaign) in self.registry.active().await {
            out.push(snapshot(&id, &campaign).await);
        }
        for (id, campaign) in self.registry.completed().await {
            out.push(snapshot(&id, &campaign).await);
        }
        out
    }

    /// Adjusts the profit targets of a live campaign. `None` leaves the
    /// corresponding target unchanged.
    pub async fn modify(
        &self,
        id: &str,
        take_profit_pct: Option<Decimal>,
        stop_loss_pct: Option<Decimal>,
    ) -> Result<GridSnapshot, ExecutionError> {
        let campaign = self
            .registry
            .get_active(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;
        {
            let mut runtime = campaign.runtime.lock().await;
            if let Some(tp) = take_profit_pct {
                runtime.take_profit_pct = Some(tp);
            }
            if let Some(sl) = stop_loss_pct {
                runtime.stop_loss_pct = Some(sl);
            }
            info!(
                id,
                take_profit_pct = ?runtime.take_profit_pct,
                stop_loss_pct = ?runtime.stop_loss_pct,
                "grid targets updated"
            );
        }
        Ok(snapshot(id, &campaign).await)
    }

    /// Stops every active campaign, returning how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for id in self.registry.active_ids().await {
            match self.stop(&id).await {
                Ok(_) => stopped += 1,
                Err(ExecutionError::InvalidState { .. }) => {}
                Err(e) => warn!(id, %e, "failed to stop grid campaign"),
            }
        }
        stopped
    }

    pub async fn clean_completed(&self) -> usize {
        self.registry.clean_completed().await
    }

    /// Cancels orders a `start` placed before it noticed a concurrent `stop`.
    /// These are not in the runtime yet, so `stop` cannot see them.
    async fn unwind_startup_orders(&self, symbol: &str, placed: &[GridOrder]) {
        for order in placed {
            if let Err(e) = self.connector.cancel_order(symbol, order.order_id).await {
                warn!(order_id = order.order_id, %e, "failed to cancel order during startup unwind");
            }
        }
    }

    /// Mid price with an order-book fallback.
    async fn discover_price(&self, symbol: &str) -> Option<Decimal> {
        match self.connector.get_mid_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol, %e, "mid price unavailable, falling back to the book");
                self.connector.get_order_book(symbol).await.ok().map(|b| b.mid())
            }
        }
    }
}

async fn snapshot(id: &str, campaign: &GridCampaign) -> GridSnapshot {
    let runtime = campaign.runtime.lock().await;
    GridSnapshot {
        id: id.to_string(),
        symbol: campaign.params.symbol.clone(),
        status: runtime.status,
        lower_price: campaign.params.lower_price,
        upper_price: campaign.params.upper_price,
        num_levels: campaign.params.num_levels,
        level_spacing: campaign.level_spacing,
        investment_per_level: campaign.investment_per_level,
        levels: campaign.levels.clone(),
        current_price: runtime.current_price,
        open_orders: runtime
            .orders
            .iter()
            .filter(|o| o.status == GridOrderStatus::Open)
            .count(),
        buy_fills: runtime.buy_fills,
        sell_fills: runtime.sell_fills,
        realized_pnl: runtime.realized_pnl,
        take_profit_pct: runtime.take_profit_pct,
        stop_loss_pct: runtime.stop_loss_pct,
        last_error: runtime.last_error.clone(),
    }
}

/// The background loop: poll for fills, place counter-orders, enforce the
/// profit targets.
async fn monitor_campaign(
    connector: Arc<dyn ExchangeConnector>,
    normalizer: Normalizer,
    campaign: Arc<GridCampaign>,
    id: String,
    registry: Arc<CampaignRegistry<GridCampaign>>,
    poll_interval: Duration,
) {
    loop {
        if wait_cancellable(&campaign.cancelled, poll_interval).await {
            info!(id, "grid monitor shutting down");
            return;
        }

        if let Err(e) = poll_once(&connector, &normalizer, &campaign).await {
            warn!(id, %e, "grid poll failed");
            campaign.runtime.lock().await.last_error = Some(e.to_string());
            continue;
        }

        let triggered = {
            let runtime = campaign.runtime.lock().await;
            let basis = campaign.params.total_investment;
            let tp_hit = runtime
                .take_profit_pct
                .is_some_and(|tp| runtime.realized_pnl >= basis * tp / dec!(100));
            let sl_hit = runtime
                .stop_loss_pct
                .is_some_and(|sl| runtime.realized_pnl <= -(basis * sl / dec!(100)));
            if tp_hit {
                Some("take profit reached")
            } else if sl_hit {
                Some("stop loss reached")
            } else {
                None
            }
        };

        if let Some(reason) = triggered {
            info!(id, reason, "grid target hit, shutting the grid down");
            campaign.cancelled.store(true, Ordering::SeqCst);
            let (cancelled, failed) = cancel_resting_orders(&connector, &campaign).await;
            campaign.runtime.lock().await.status = GridStatus::Stopped;
            registry.promote(&id).await;
            info!(id, cancelled, failed, "grid campaign closed by target");
            return;
        }
    }
}

/// One poll cycle. Marks tracked orders that left the venue's open set as
/// filled, then places the counter-order for every fill that does not have
/// one yet.
///
/// Network calls happen outside the runtime lock; a fill is inserted into
/// `paired_fills` only once its counter-order is accepted.
async fn poll_once(
    connector: &Arc<dyn ExchangeConnector>,
    normalizer: &Normalizer,
    campaign: &GridCampaign,
) -> Result<(), ExecutionError> {
    struct CounterOrder {
        fill_id: u64,
        side: OrderSide,
        price: Decimal,
        size: Decimal,
    }

    let open = connector.get_open_orders().await?;
    let venue_open: HashSet<u64> = open
        .iter()
        .filter(|o| o.symbol == campaign.params.symbol)
        .map(|o| o.order_id)
        .collect();

    let mut counters = Vec::new();
    {
        let mut guard = campaign.runtime.lock().await;
        let runtime = &mut *guard;
        for order in runtime.orders.iter_mut() {
            if order.status == GridOrderStatus::Open && !venue_open.contains(&order.order_id) {
                order.status = GridOrderStatus::Filled;
                info!(
                    order_id = order.order_id,
                    side = ?order.side,
                    price = %order.price,
                    "grid order filled"
                );
                match order.side {
                    OrderSide::Buy => runtime.buy_fills += 1,
                    OrderSide::Sell => {
                        runtime.sell_fills += 1;
                        // A sell fill closes the pair opened one level below.
                        runtime.realized_pnl += campaign.level_spacing * order.size;
                    }
                }
            }
        }

        // Every fill without a recorded counter-order, including retries from
        // earlier failed placements.
        for order in runtime.orders.iter() {
            if order.status == GridOrderStatus::Filled
                && !runtime.paired_fills.contains(&order.order_id)
            {
                let (side, price) = match order.side {
                    OrderSide::Buy => (OrderSide::Sell, order.price + campaign.level_spacing),
                    OrderSide::Sell => (OrderSide::Buy, order.price - campaign.level_spacing),
                };
                counters.push(CounterOrder {
                    fill_id: order.order_id,
                    side,
                    price,
                    size: order.size,
                });
            }
        }
    }

    for counter in counters {
        if counter.price < campaign.params.lower_price
            || counter.price > campaign.params.upper_price
        {
            // No counter outside the range; close the pair out so it is not
            // retried forever.
            campaign
                .runtime
                .lock()
                .await
                .paired_fills
                .insert(counter.fill_id);
            continue;
        }

        let price = normalizer
            .normalize_price(&campaign.params.symbol, counter.price)
            .await;
        let order = OrderRequest::limit(
            campaign.params.symbol.clone(),
            counter.side,
            counter.size,
            price,
        );
        match connector.submit_order(&order).await {
            Ok(result) if result.accepted => {
                if let Some(order_id) = result.order_id {
                    info!(order_id, side = ?counter.side, %price, "grid counter-order placed");
                    let mut runtime = campaign.runtime.lock().await;
                    runtime.paired_fills.insert(counter.fill_id);
                    runtime.orders.push(GridOrder {
                        order_id,
                        side: counter.side,
                        price,
                        size: counter.size,
                        status: GridOrderStatus::Open,
                        paired_with: Some(counter.fill_id),
                    });
                }
            }
            // Left unpaired on purpose: the next poll retries the placement.
            Ok(result) => {
                warn!(%price, reason = ?result.error, "grid counter-order rejected, will retry")
            }
            Err(e) => warn!(%price, %e, "grid counter-order failed, will retry"),
        }
    }
    Ok(())
}

/// Cancels every tracked order still open on the venue. Returns
/// (cancelled, failed) counts.
async fn cancel_resting_orders(
    connector: &Arc<dyn ExchangeConnector>,
    campaign: &GridCampaign,
) -> (usize, usize) {
    let resting: Vec<u64> = {
        let runtime = campaign.runtime.lock().await;
        runtime
            .orders
            .iter()
            .filter(|o| o.status == GridOrderStatus::Open)
            .map(|o| o.order_id)
            .collect()
    };

    let mut cancelled = 0;
    let mut failed = 0;
    for order_id in resting {
        match connector.cancel_order(&campaign.params.symbol, order_id).await {
            Ok(()) => {
                cancelled += 1;
                let mut runtime = campaign.runtime.lock().await;
                if let Some(order) = runtime.orders.iter_mut().find(|o| o.order_id == order_id) {
                    order.status = GridOrderStatus::Cancelled;
                }
            }
            Err(e) => {
                warn!(order_id, %e, "failed to cancel grid order");
                failed += 1;
            }
        }
    }
    (cancelled, failed)
}
