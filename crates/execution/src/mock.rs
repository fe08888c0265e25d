//! A scriptable in-memory `ExchangeConnector` for driver tests.
//!
//! Limit orders rest in an open-order list the test can manipulate (e.g.
//! `fill_order` to simulate a venue-side fill); market orders fill immediately
//! at the scripted mid price. Submission indices can be scripted to fail so
//! partial-progress paths are exercised.

use api_client::error::ApiError;
use api_client::{BookLevel, ExchangeConnector, InstrumentPrecision, OpenOrder, OrderBook};
use async_trait::async_trait;
use core_types::{OrderRequest, OrderResult, OrderType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub(crate) struct MockConnector {
    submitted: Mutex<Vec<OrderRequest>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    next_id: AtomicU64,
    submissions: AtomicU64,
    reject_at: Mutex<HashSet<u64>>,
    mid: Mutex<Option<Decimal>>,
    book: Mutex<Option<OrderBook>>,
    precision: Mutex<Option<InstrumentPrecision>>,
    leverage_calls: Mutex<Vec<(String, u8)>>,
    cancelled: Mutex<Vec<u64>>,
    fail_cancel: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            submissions: AtomicU64::new(0),
            reject_at: Mutex::new(HashSet::new()),
            mid: Mutex::new(Some(dec!(100))),
            book: Mutex::new(None),
            precision: Mutex::new(None),
            leverage_calls: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_cancel: AtomicBool::new(false),
        }
    }

    pub fn set_mid(&self, price: Option<Decimal>) {
        *self.mid.lock().unwrap() = price;
    }

    pub fn set_book(&self, best_bid: Decimal, best_ask: Decimal) {
        *self.book.lock().unwrap() = Some(OrderBook {
            best_bid,
            best_ask,
            bids: vec![BookLevel { price: best_bid, size: dec!(10) }],
            asks: vec![BookLevel { price: best_ask, size: dec!(10) }],
        });
    }

    pub fn set_precision(&self, precision: InstrumentPrecision) {
        *self.precision.lock().unwrap() = Some(precision);
    }

    /// Makes every metadata lookup fail, exercising the fallback paths.
    pub fn fail_metadata(&self) {
        *self.precision.lock().unwrap() = None;
    }

    /// Scripts the n-th submission (0-based, across all orders) to be
    /// rejected by the venue.
    pub fn reject_submission(&self, index: u64) {
        self.reject_at.lock().unwrap().insert(index);
    }

    pub fn fail_cancels(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    /// Simulates a venue-side fill: the order disappears from the open list.
    pub fn fill_order(&self, order_id: u64) {
        self.open_orders
            .lock()
            .unwrap()
            .retain(|o| o.order_id != order_id);
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn open_ids(&self) -> Vec<u64> {
        self.open_orders
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.order_id)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<u64> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u8)> {
        self.leverage_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeConnector for MockConnector {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult, ApiError> {
        self.submitted.lock().unwrap().push(order.clone());
        let index = self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.reject_at.lock().unwrap().contains(&index) {
            return Ok(OrderResult::rejected("scripted rejection"));
        }

        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match order.order_type {
            OrderType::Market => {
                let price = self.mid.lock().unwrap().unwrap_or(dec!(100));
                Ok(OrderResult {
                    accepted: true,
                    order_id: Some(order_id),
                    filled_size: order.size,
                    avg_price: price,
                    error: None,
                })
            }
            OrderType::Limit => {
                self.open_orders.lock().unwrap().push(OpenOrder {
                    symbol: order.symbol.clone(),
                    order_id,
                    side: order.side,
                    size: order.size,
                    price: order.price.unwrap_or_default(),
                    status: "NEW".to_string(),
                });
                Ok(OrderResult {
                    accepted: true,
                    order_id: Some(order_id),
                    filled_size: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    error: None,
                })
            }
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: u64) -> Result<(), ApiError> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(ApiError::Venue(-2011, "Unknown order sent.".to_string()));
        }
        self.open_orders
            .lock()
            .unwrap()
            .retain(|o| o.order_id != order_id);
        self.cancelled.lock().unwrap().push(order_id);
        Ok(())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn get_order_book(&self, _symbol: &str) -> Result<OrderBook, ApiError> {
        self.book
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::InvalidData("no book scripted".to_string()))
    }

    async fn get_mid_price(&self, _symbol: &str) -> Result<Decimal, ApiError> {
        let mid = *self.mid.lock().unwrap();
        mid.ok_or_else(|| ApiError::InvalidData("no mid price scripted".to_string()))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ApiError> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn get_instrument_precision(&self, symbol: &str) -> Result<InstrumentPrecision, ApiError> {
        let precision = *self.precision.lock().unwrap();
        precision
            .ok_or_else(|| ApiError::InvalidData(format!("no exchange info returned for {symbol}")))
    }
}
