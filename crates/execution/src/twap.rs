//! The TWAP scheduler: a long-lived campaign that drips a total quantity
//! into the market as evenly spaced slices, market by default or resting
//! limits when a price limit is set.
//!
//! Each started campaign owns one background task. The task checkpoints the
//! cancellation flag at least once a second, so a stop request never waits
//! for a full slice interval. Natural completion promotes the campaign to the
//! completed map on its own.

use crate::error::ExecutionError;
use crate::normalize::Normalizer;
use crate::registry::CampaignRegistry;
use crate::util::wait_cancellable;
use api_client::ExchangeConnector;
use chrono::{DateTime, Utc};
use core_types::{MarketKind, OrderRequest, OrderSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long `stop` waits for a campaign task to acknowledge cancellation
/// before detaching from it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TwapParams {
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: Decimal,
    pub duration: Duration,
    pub num_slices: u32,
    /// When set, slices go out as limit orders at this price instead of
    /// market orders.
    pub price_limit: Option<Decimal>,
    pub market: MarketKind,
    pub leverage: u8,
}

/// One registered TWAP campaign: immutable parameters plus mutable runtime
/// state behind a mutex.
pub struct TwapCampaign {
    pub params: TwapParams,
    pub slice_quantity: Decimal,
    pub interval: Duration,
    runtime: Mutex<TwapRuntime>,
    cancelled: AtomicBool,
}

#[derive(Default)]
struct TwapRuntime {
    running: bool,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    slices_executed: u32,
    total_executed: Decimal,
    fill_prices: Vec<Decimal>,
    average_price: Option<Decimal>,
    errors: Vec<String>,
    task: Option<JoinHandle<()>>,
}

/// A point-in-time view of a campaign, safe to serialize for the front ends.
#[derive(Debug, Clone, Serialize)]
pub struct TwapSnapshot {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: String,
    pub total_quantity: Decimal,
    pub slice_quantity: Decimal,
    pub num_slices: u32,
    pub interval_secs: u64,
    pub slices_executed: u32,
    pub completion_percentage: Decimal,
    pub total_executed: Decimal,
    pub remaining: Decimal,
    pub average_price: Option<Decimal>,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub struct TwapManager {
    connector: Arc<dyn ExchangeConnector>,
    normalizer: Normalizer,
    registry: Arc<CampaignRegistry<TwapCampaign>>,
}

impl TwapManager {
    pub fn new(connector: Arc<dyn ExchangeConnector>) -> Self {
        Self {
            normalizer: Normalizer::new(Arc::clone(&connector)),
            connector,
            registry: Arc::new(CampaignRegistry::new("twap")),
        }
    }

    /// Validates the parameters, derives the slice size and interval, and
    /// registers the campaign. Nothing touches the exchange until `start`.
    pub async fn create(&self, params: TwapParams) -> Result<String, ExecutionError> {
        if params.total_quantity <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParams(
                "total quantity must be greater than 0".to_string(),
            ));
        }
        if params.num_slices == 0 {
            return Err(ExecutionError::InvalidParams(
                "number of slices must be greater than 0".to_string(),
            ));
        }
        if params.duration.is_zero() {
            return Err(ExecutionError::InvalidParams(
                "duration must be greater than 0".to_string(),
            ));
        }

        let slice_quantity = params.total_quantity / Decimal::from(params.num_slices);
        let interval = params.duration / params.num_slices;

        let campaign = TwapCampaign {
            params,
            slice_quantity,
            interval,
            runtime: Mutex::new(TwapRuntime::default()),
            cancelled: AtomicBool::new(false),
        };
        let (id, campaign) = self.registry.insert(campaign).await;
        info!(
            id,
            symbol = %campaign.params.symbol,
            slices = campaign.params.num_slices,
            slice_quantity = %slice_quantity,
            interval_secs = interval.as_secs(),
            "TWAP campaign created"
        );
        Ok(id)
    }

    /// Spawns the campaign's execution task. Starting an already-running
    /// campaign is an error, not a second task.
    pub async fn start(&self, id: &str) -> Result<(), ExecutionError> {
        let campaign = self
            .registry
            .get_active(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;

        let mut runtime = campaign.runtime.lock().await;
        if runtime.running {
            return Err(ExecutionError::InvalidState {
                id: id.to_string(),
                state: "already running".to_string(),
            });
        }
        if runtime.ended_at.is_some() {
            return Err(ExecutionError::InvalidState {
                id: id.to_string(),
                state: "already finished".to_string(),
            });
        }
        runtime.running = true;
        runtime.started_at = Some(Utc::now());

        let handle = tokio::spawn(run_campaign(
            Arc::clone(&self.connector),
            self.normalizer.clone(),
            Arc::clone(&campaign),
            id.to_string(),
            Arc::clone(&self.registry),
        ));
        runtime.task = Some(handle);
        info!(id, "TWAP campaign started");
        Ok(())
    }

    /// Raises the cancellation flag, waits (bounded) for the task to drain,
    /// and promotes the campaign to completed.
    pub async fn stop(&self, id: &str) -> Result<TwapSnapshot, ExecutionError> {
        let campaign = self
            .registry
            .get_active(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;

        let handle = {
            let mut runtime = campaign.runtime.lock().await;
            if !runtime.running {
                return Err(ExecutionError::InvalidState {
                    id: id.to_string(),
                    state: "not running".to_string(),
                });
            }
            campaign.cancelled.store(true, Ordering::SeqCst);
            runtime.task.take()
        };

        // The task locks the runtime itself, so the await happens outside
        // the lock.
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!(id, "TWAP task did not acknowledge cancellation in time, detaching");
            }
        }

        {
            let mut runtime = campaign.runtime.lock().await;
            runtime.running = false;
            if runtime.ended_at.is_none() {
                runtime.ended_at = Some(Utc::now());
            }
        }
        self.registry.promote(id).await;
        info!(id, "TWAP campaign stopped");
        Ok(snapshot(id, &campaign, false).await)
    }

    /// Looks the campaign up in both maps.
    pub async fn status(&self, id: &str) -> Result<TwapSnapshot, ExecutionError> {
        let (campaign, active) = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| ExecutionError::CampaignNotFound(id.to_string()))?;
        Ok(snapshot(id, &campaign, active).await)
    }

    pub async fn list(&self) -> Vec<TwapSnapshot> {
        let mut out = Vec::new();
        for (id, campaign) in self.registry.active().await {
            out.push(snapshot(&id, &campaign, true).await);
        }
        for (id, campaign) in self.registry.completed().await {
            out.push(snapshot(&id, &campaign, false).await);
        }
        out
    }

    /// Stops every running campaign, returning how many were stopped.
    /// Campaigns that were created but never started are skipped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for id in self.registry.active_ids().await {
            match self.stop(&id).await {
                Ok(_) => stopped += 1,
                Err(ExecutionError::InvalidState { .. }) => {}
                Err(e) => warn!(id, %e, "failed to stop TWAP campaign"),
            }
        }
        stopped
    }

    pub async fn clean_completed(&self) -> usize {
        self.registry.clean_completed().await
    }
}

async fn snapshot(id: &str, campaign: &TwapCampaign, active: bool) -> TwapSnapshot {
    let runtime = campaign.runtime.lock().await;
    let status = if !active {
        "completed"
    } else if runtime.running {
        "running"
    } else if runtime.started_at.is_none() {
        "created"
    } else {
        "stopping"
    };
    TwapSnapshot {
        id: id.to_string(),
        symbol: campaign.params.symbol.clone(),
        side: campaign.params.side,
        status: status.to_string(),
        total_quantity: campaign.params.total_quantity,
        slice_quantity: campaign.slice_quantity,
        num_slices: campaign.params.num_slices,
        interval_secs: campaign.interval.as_secs(),
        slices_executed: runtime.slices_executed,
        completion_percentage: Decimal::from(runtime.slices_executed) * dec!(100)
            / Decimal::from(campaign.params.num_slices),
        total_executed: runtime.total_executed,
        remaining: campaign.params.total_quantity - runtime.total_executed,
        average_price: runtime.average_price,
        errors: runtime.errors.clone(),
        started_at: runtime.started_at,
        ended_at: runtime.ended_at,
    }
}

/// The campaign body. Runs on its own task until every slice has been
/// attempted or the cancellation flag goes up.
async fn run_campaign(
    connector: Arc<dyn ExchangeConnector>,
    normalizer: Normalizer,
    campaign: Arc<TwapCampaign>,
    id: String,
    registry: Arc<CampaignRegistry<TwapCampaign>>,
) {
    let params = &campaign.params;

    if params.market == MarketKind::Perpetual {
        if let Err(e) = connector.set_leverage(&params.symbol, params.leverage).await {
            warn!(id, %e, "failed to set leverage, continuing at current setting");
            campaign
                .runtime
                .lock()
                .await
                .errors
                .push(format!("set leverage failed: {e}"));
        }
    }

    let slice = normalizer
        .normalize_size(&params.symbol, campaign.slice_quantity)
        .await;

    let schedule_start = tokio::time::Instant::now();
    for i in 0..params.num_slices {
        if campaign.cancelled.load(Ordering::SeqCst) {
            info!(id, slice = i + 1, "TWAP campaign cancelled");
            break;
        }

        execute_slice(&connector, &campaign, &id, i, slice).await;

        if i + 1 < params.num_slices {
            // Slice boundaries sit on a fixed schedule from the campaign
            // start; only the time left to the next boundary is waited, so
            // submission latency never drifts the cadence.
            let deadline = schedule_start + campaign.interval * (i + 1);
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if wait_cancellable(&campaign.cancelled, remaining).await {
                info!(id, "TWAP campaign cancelled between slices");
                break;
            }
        }
    }

    {
        let mut runtime = campaign.runtime.lock().await;
        runtime.running = false;
        runtime.ended_at = Some(Utc::now());
    }

    // A stopped campaign is promoted by `stop`; a natural finish promotes
    // itself.
    if !campaign.cancelled.load(Ordering::SeqCst) {
        registry.promote(&id).await;
        info!(id, "TWAP campaign completed");
    }
}

/// Attempts one slice. A failure is recorded and the cadence keeps running;
/// the next slice fires on schedule.
async fn execute_slice(
    connector: &Arc<dyn ExchangeConnector>,
    campaign: &TwapCampaign,
    id: &str,
    index: u32,
    slice: Decimal,
) {
    let params = &campaign.params;
    let slice_no = index + 1;

    let order = match params.price_limit {
        Some(limit) => OrderRequest::limit(params.symbol.clone(), params.side, slice, limit),
        None => OrderRequest::market(params.symbol.clone(), params.side, slice),
    };
    let outcome = connector.submit_order(&order).await;
    let mut runtime = campaign.runtime.lock().await;
    // Every attempted slice advances the schedule count, accepted or not.
    runtime.slices_executed += 1;
    match outcome {
        Ok(result) if result.accepted => {
            runtime.total_executed += result.filled_size;
            // A resting limit slice has no fill yet and contributes no price.
            if result.filled_size > Decimal::ZERO {
                runtime.fill_prices.push(result.avg_price);
                let sum: Decimal = runtime.fill_prices.iter().copied().sum();
                runtime.average_price =
                    Some(sum / Decimal::from(runtime.fill_prices.len() as u64));
            }
            info!(
                id,
                slice = slice_no,
                total = params.num_slices,
                filled = %result.filled_size,
                price = %result.avg_price,
                "TWAP slice executed"
            );
        }
        Ok(result) => {
            warn!(id, slice = slice_no, reason = ?result.error, "TWAP slice rejected");
            runtime.errors.push(format!(
                "slice {slice_no}: rejected: {}",
                result.error.unwrap_or_default()
            ));
        }
        Err(e) => {
            warn!(id, slice = slice_no, %e, "TWAP slice failed");
            runtime.errors.push(format!("slice {slice_no}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use api_client::error::ApiError;
    use api_client::{InstrumentPrecision, OpenOrder, OrderBook};
    use async_trait::async_trait;
    use core_types::OrderResult;
    use rust_decimal_macros::dec;

    /// Delegates to the mock after a fixed submission latency.
    struct SlowConnector {
        inner: Arc<MockConnector>,
        latency: Duration,
    }

    #[async_trait]
    impl ExchangeConnector for SlowConnector {
        async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult, ApiError> {
            tokio::time::sleep(self.latency).await;
            self.inner.submit_order(order).await
        }

        async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ApiError> {
            self.inner.cancel_order(symbol, order_id).await
        }

        async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
            self.inner.get_open_orders().await
        }

        async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ApiError> {
            self.inner.get_order_book(symbol).await
        }

        async fn get_mid_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
            self.inner.get_mid_price(symbol).await
        }

        async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ApiError> {
            self.inner.set_leverage(symbol, leverage).await
        }

        async fn get_instrument_precision(
            &self,
            symbol: &str,
        ) -> Result<InstrumentPrecision, ApiError> {
            self.inner.get_instrument_precision(symbol).await
        }
    }

    fn manager(mock: &Arc<MockConnector>) -> TwapManager {
        mock.set_precision(InstrumentPrecision {
            size_decimals: 4,
            price_decimals: 2,
            is_derivative: true,
        });
        TwapManager::new(Arc::clone(mock) as Arc<dyn ExchangeConnector>)
    }

    fn params() -> TwapParams {
        TwapParams {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            total_quantity: dec!(10),
            duration: Duration::from_secs(600),
            num_slices: 5,
            price_limit: None,
            market: MarketKind::Spot,
            leverage: 1,
        }
    }

    #[tokio::test]
    async fn create_derives_slice_quantity_and_interval() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        let id = manager.create(params()).await.unwrap();
        let snap = manager.status(&id).await.unwrap();
        assert_eq!(snap.status, "created");
        assert_eq!(snap.slice_quantity, dec!(2));
        assert_eq!(snap.interval_secs, 120);
        assert_eq!(snap.slices_executed, 0);
    }

    #[tokio::test]
    async fn create_rejects_degenerate_parameters() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        for bad in [
            TwapParams { total_quantity: dec!(0), ..params() },
            TwapParams { num_slices: 0, ..params() },
            TwapParams { duration: Duration::ZERO, ..params() },
        ] {
            assert!(matches!(
                manager.create(bad).await,
                Err(ExecutionError::InvalidParams(_))
            ));
        }
    }

    #[tokio::test]
    async fn stop_requires_a_running_campaign() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        assert!(matches!(
            manager.stop("twap_nope").await,
            Err(ExecutionError::CampaignNotFound(_))
        ));

        let id = manager.create(params()).await.unwrap();
        assert!(matches!(
            manager.stop(&id).await,
            Err(ExecutionError::InvalidState { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn campaign_runs_to_natural_completion() {
        let mock = Arc::new(MockConnector::new());
        mock.set_mid(Some(dec!(100)));
        let manager = manager(&mock);

        let id = manager
            .create(TwapParams {
                num_slices: 4,
                total_quantity: dec!(2),
                duration: Duration::from_secs(40),
                market: MarketKind::Perpetual,
                leverage: 5,
                ..params()
            })
            .await
            .unwrap();
        manager.start(&id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;

        let snap = manager.status(&id).await.unwrap();
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.slices_executed, 4);
        assert_eq!(snap.total_executed, dec!(2));
        assert_eq!(snap.average_price, Some(dec!(100)));
        assert_eq!(mock.submitted().len(), 4);
        assert_eq!(mock.leverage_calls(), vec![("ETHUSDT".to_string(), 5)]);

        // Once completed the campaign can no longer be stopped.
        assert!(matches!(
            manager.stop(&id).await,
            Err(ExecutionError::CampaignNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn submission_latency_does_not_drift_slice_boundaries() {
        let mock = Arc::new(MockConnector::new());
        mock.set_mid(Some(dec!(100)));
        mock.set_precision(InstrumentPrecision {
            size_decimals: 4,
            price_decimals: 2,
            is_derivative: true,
        });
        let slow = Arc::new(SlowConnector {
            inner: Arc::clone(&mock),
            latency: Duration::from_secs(30),
        });
        let manager = TwapManager::new(slow as Arc<dyn ExchangeConnector>);

        let id = manager
            .create(TwapParams {
                num_slices: 3,
                total_quantity: dec!(3),
                duration: Duration::from_secs(180),
                ..params()
            })
            .await
            .unwrap();
        manager.start(&id).await.unwrap();

        // Boundaries sit at 0s/60s/120s and each submission takes 30s. The
        // wait covers only the time left to the next boundary, so the last
        // slice lands at 150s rather than sliding out to 180s.
        tokio::time::sleep(Duration::from_secs(155)).await;
        assert_eq!(mock.submitted().len(), 3);

        let snap = manager.status(&id).await.unwrap();
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.slices_executed, 3);
        assert_eq!(snap.total_executed, dec!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_slices_still_advance_the_schedule() {
        let mock = Arc::new(MockConnector::new());
        mock.set_mid(Some(dec!(100)));
        let manager = manager(&mock);

        let id = manager
            .create(TwapParams {
                num_slices: 3,
                total_quantity: dec!(3),
                duration: Duration::from_secs(30),
                ..params()
            })
            .await
            .unwrap();
        // The venue rejects the second slice.
        mock.reject_submission(1);
        manager.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let snap = manager.status(&id).await.unwrap();
        assert_eq!(snap.status, "completed");
        // The count tracks attempts, so a mid-campaign failure never stalls
        // the reported progress.
        assert_eq!(snap.slices_executed, 3);
        assert_eq!(snap.completion_percentage, dec!(100));
        assert_eq!(snap.total_executed, dec!(2));
        assert_eq!(snap.remaining, dec!(1));
        assert_eq!(snap.errors.len(), 1);
        assert_eq!(snap.average_price, Some(dec!(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_running_campaign() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        let id = manager
            .create(TwapParams {
                num_slices: 100,
                duration: Duration::from_secs(10_000),
                ..params()
            })
            .await
            .unwrap();
        manager.start(&id).await.unwrap();

        // Let a couple of slices through, then cut the campaign short.
        tokio::time::sleep(Duration::from_secs(150)).await;
        let snap = manager.stop(&id).await.unwrap();

        assert!(snap.slices_executed >= 1);
        assert!(snap.slices_executed < 100);
        assert_eq!(snap.status, "completed");
        assert!(snap.ended_at.is_some());
        assert!(matches!(
            manager.start(&id).await,
            Err(ExecutionError::CampaignNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn price_limit_turns_slices_into_resting_limits() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        let id = manager
            .create(TwapParams {
                num_slices: 3,
                total_quantity: dec!(3),
                duration: Duration::from_secs(30),
                price_limit: Some(dec!(90)),
                ..params()
            })
            .await
            .unwrap();
        manager.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let snap = manager.status(&id).await.unwrap();
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.slices_executed, 3);
        assert_eq!(snap.completion_percentage, dec!(100));
        // The limits are resting unfilled, so nothing has executed yet.
        assert_eq!(snap.total_executed, dec!(0));
        assert_eq!(snap.remaining, dec!(3));
        assert_eq!(snap.average_price, None);
        for order in mock.submitted() {
            assert_eq!(order.price, Some(dec!(90)));
        }
        assert_eq!(mock.open_ids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_stops_running_and_skips_unstarted() {
        let mock = Arc::new(MockConnector::new());
        let manager = manager(&mock);

        let running = manager
            .create(TwapParams {
                num_slices: 50,
                duration: Duration::from_secs(5_000),
                ..params()
            })
            .await
            .unwrap();
        manager.start(&running).await.unwrap();
        let idle = manager.create(params()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.stop_all().await, 1);

        assert_eq!(manager.status(&running).await.unwrap().status, "completed");
        assert_eq!(manager.status(&idle).await.unwrap().status, "created");
    }
}
