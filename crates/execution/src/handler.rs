//! The single entry point the binary and any front end talk to.
//!
//! `ExecutionHandler` owns one connector and one driver of each kind; every
//! operation delegates to the driver that implements it. Front ends never
//! construct a driver directly.

use crate::error::ExecutionError;
use crate::grid::{GridManager, GridParams, GridSnapshot, GridStopReport};
use crate::scaled::{LadderReport, LadderRequest, ScaledOrderDriver};
use crate::twap::{TwapManager, TwapParams, TwapSnapshot};
use api_client::{ExchangeConnector, OpenOrder};
use configuration::ExecutionSettings;
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct ExecutionHandler {
    connector: Arc<dyn ExchangeConnector>,
    scaled: ScaledOrderDriver,
    twap: TwapManager,
    grid: GridManager,
}

impl ExecutionHandler {
    pub fn new(connector: Arc<dyn ExchangeConnector>, settings: &ExecutionSettings) -> Self {
        Self {
            scaled: ScaledOrderDriver::new(Arc::clone(&connector), settings),
            twap: TwapManager::new(Arc::clone(&connector)),
            grid: GridManager::new(Arc::clone(&connector), settings),
            connector,
        }
    }

    // --- Scaled ladders ---

    pub async fn place_ladder(&self, req: LadderRequest) -> Result<LadderReport, ExecutionError> {
        self.scaled.place_ladder(req).await
    }

    pub async fn place_ladder_leveraged(
        &self,
        req: LadderRequest,
        leverage: u8,
    ) -> Result<LadderReport, ExecutionError> {
        self.scaled.place_ladder_leveraged(req, leverage).await
    }

    pub async fn market_aware_buy(
        &self,
        symbol: &str,
        total_size: Decimal,
        num_orders: usize,
        price_percent: Option<Decimal>,
        skew: f64,
    ) -> Result<LadderReport, ExecutionError> {
        self.scaled
            .market_aware_buy(symbol, total_size, num_orders, price_percent, skew)
            .await
    }

    pub async fn market_aware_sell(
        &self,
        symbol: &str,
        total_size: Decimal,
        num_orders: usize,
        price_percent: Option<Decimal>,
        skew: f64,
    ) -> Result<LadderReport, ExecutionError> {
        self.scaled
            .market_aware_sell(symbol, total_size, num_orders, price_percent, skew)
            .await
    }

    // --- TWAP campaigns ---

    pub async fn create_twap(&self, params: TwapParams) -> Result<String, ExecutionError> {
        self.twap.create(params).await
    }

    pub async fn start_twap(&self, id: &str) -> Result<(), ExecutionError> {
        self.twap.start(id).await
    }

    pub async fn stop_twap(&self, id: &str) -> Result<TwapSnapshot, ExecutionError> {
        self.twap.stop(id).await
    }

    pub async fn twap_status(&self, id: &str) -> Result<TwapSnapshot, ExecutionError> {
        self.twap.status(id).await
    }

    pub async fn list_twaps(&self) -> Vec<TwapSnapshot> {
        self.twap.list().await
    }

    // --- Grid campaigns ---

    pub async fn create_grid(&self, params: GridParams) -> Result<String, ExecutionError> {
        self.grid.create(params).await
    }

    pub async fn start_grid(&self, id: &str) -> Result<GridSnapshot, ExecutionError> {
        self.grid.start(id).await
    }

    pub async fn stop_grid(&self, id: &str) -> Result<GridStopReport, ExecutionError> {
        self.grid.stop(id).await
    }

    pub async fn grid_status(&self, id: &str) -> Result<GridSnapshot, ExecutionError> {
        self.grid.status(id).await
    }

    pub async fn list_grids(&self) -> Vec<GridSnapshot> {
        self.grid.list().await
    }

    pub async fn modify_grid(
        &self,
        id: &str,
        take_profit_pct: Option<Decimal>,
        stop_loss_pct: Option<Decimal>,
    ) -> Result<GridSnapshot, ExecutionError> {
        self.grid.modify(id, take_profit_pct, stop_loss_pct).await
    }

    // --- Housekeeping ---

    /// Stops every running campaign of both kinds. Returns (twap, grid)
    /// counts.
    pub async fn stop_all(&self) -> (usize, usize) {
        (self.twap.stop_all().await, self.grid.stop_all().await)
    }

    /// Drops finished campaigns of both kinds from the completed maps.
    pub async fn clean_completed(&self) -> (usize, usize) {
        (
            self.twap.clean_completed().await,
            self.grid.clean_completed().await,
        )
    }

    // --- Raw connector passthroughs ---

    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExecutionError> {
        Ok(self.connector.cancel_order(symbol, order_id).await?)
    }

    pub async fn open_orders(&self) -> Result<Vec<OpenOrder>, ExecutionError> {
        Ok(self.connector.get_open_orders().await?)
    }
}
