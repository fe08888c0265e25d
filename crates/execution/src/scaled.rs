//! The scaled-order driver: places a full ladder of limit orders across a
//! price band in one bounded burst.
//!
//! Rungs are submitted sequentially with a short delay to respect venue rate
//! limits; one rejected rung is recorded and the rest still go out. Partial
//! completion is a normal, reported outcome.

use crate::distribution::{distribute_size, price_levels};
use crate::error::ExecutionError;
use crate::normalize::Normalizer;
use api_client::ExchangeConnector;
use configuration::ExecutionSettings;
use core_types::{OrderRequest, OrderResult, OrderSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Maximum excursion of a ladder band past the opposite touch price. A buy
/// ladder is never priced more than 5% above the best ask, a sell ladder
/// never more than 5% below the best bid.
const MAX_BAND_RATIO: Decimal = dec!(0.05);

/// One ladder placement request.
#[derive(Debug, Clone)]
pub struct LadderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub total_size: Decimal,
    pub num_orders: usize,
    /// The aggressive edge of the band: highest price for buys, lowest for
    /// sells. An inverted pair is swapped with a warning.
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub skew: f64,
    pub reduce_only: bool,
    /// When set, the band is clamped against the live order book before
    /// placement.
    pub check_market: bool,
}

/// Per-ladder outcome: counts plus every individual order result.
#[derive(Debug, Clone, Serialize)]
pub struct LadderReport {
    pub successful_orders: usize,
    pub total_orders: usize,
    pub results: Vec<OrderResult>,
    pub sizes: Vec<Decimal>,
    pub prices: Vec<Decimal>,
}

pub struct ScaledOrderDriver {
    connector: Arc<dyn ExchangeConnector>,
    normalizer: Normalizer,
    order_delay: Duration,
    band_pct: Decimal,
}

impl ScaledOrderDriver {
    pub fn new(connector: Arc<dyn ExchangeConnector>, settings: &ExecutionSettings) -> Self {
        Self {
            normalizer: Normalizer::new(Arc::clone(&connector)),
            connector,
            order_delay: Duration::from_millis(settings.order_delay_ms),
            band_pct: settings.market_band_pct,
        }
    }

    /// Places a ladder of `num_orders` limit orders between `start_price` and
    /// `end_price`, sized by the skewed distribution.
    pub async fn place_ladder(&self, mut req: LadderRequest) -> Result<LadderReport, ExecutionError> {
        validate(&req)?;

        // The band must run from the aggressive edge toward the passive one.
        if req.side.is_buy() && req.start_price < req.end_price {
            warn!(
                symbol = %req.symbol,
                "buy ladders run from the higher price down; swapping start/end"
            );
            std::mem::swap(&mut req.start_price, &mut req.end_price);
        } else if !req.side.is_buy() && req.start_price > req.end_price {
            warn!(
                symbol = %req.symbol,
                "sell ladders run from the lower price up; swapping start/end"
            );
            std::mem::swap(&mut req.start_price, &mut req.end_price);
        }

        if req.check_market {
            self.clamp_to_book(&mut req).await;
        }

        let sizes = distribute_size(req.total_size, req.num_orders, req.skew);
        let prices = price_levels(
            req.side.is_buy(),
            req.num_orders,
            req.start_price,
            req.end_price,
        );

        let mut norm_sizes = Vec::with_capacity(sizes.len());
        for size in &sizes {
            norm_sizes.push(self.normalizer.normalize_size(&req.symbol, *size).await);
        }
        let mut norm_prices = Vec::with_capacity(prices.len());
        for price in &prices {
            norm_prices.push(self.normalizer.normalize_price(&req.symbol, *price).await);
        }

        info!(
            symbol = %req.symbol,
            side = ?req.side,
            orders = req.num_orders,
            start = %req.start_price,
            end = %req.end_price,
            total = %req.total_size,
            "placing scaled order ladder"
        );

        let total = norm_sizes.len();
        let mut results = Vec::with_capacity(total);
        let mut successful = 0;
        for (i, (size, price)) in norm_sizes.iter().zip(norm_prices.iter()).enumerate() {
            let order = OrderRequest::limit(req.symbol.clone(), req.side, *size, *price)
                .reduce_only(req.reduce_only);
            let result = match self.connector.submit_order(&order).await {
                Ok(res) => res,
                // Transport failures are recorded per rung; the rest of the
                // ladder still goes out.
                Err(e) => OrderResult::rejected(e.to_string()),
            };

            if result.accepted {
                successful += 1;
                info!(rung = i + 1, total, size = %size, price = %price, "ladder rung placed");
            } else {
                error!(rung = i + 1, total, reason = ?result.error, "ladder rung failed");
            }
            results.push(result);

            if i + 1 < total {
                tokio::time::sleep(self.order_delay).await;
            }
        }

        Ok(LadderReport {
            successful_orders: successful,
            total_orders: total,
            results,
            sizes: norm_sizes,
            prices: norm_prices,
        })
    }

    /// Derivatives variant: sets the symbol's leverage first, then delegates
    /// to the standard ladder routine.
    pub async fn place_ladder_leveraged(
        &self,
        req: LadderRequest,
        leverage: u8,
    ) -> Result<LadderReport, ExecutionError> {
        info!(symbol = %req.symbol, leverage, "setting leverage for ladder");
        self.connector.set_leverage(&req.symbol, leverage).await?;
        self.place_ladder(req).await
    }

    /// Derives a buy band from the live book — from `price_percent` below the
    /// best ask down to the best bid — and places the ladder without a
    /// redundant second book check.
    pub async fn market_aware_buy(
        &self,
        symbol: &str,
        total_size: Decimal,
        num_orders: usize,
        price_percent: Option<Decimal>,
        skew: f64,
    ) -> Result<LadderReport, ExecutionError> {
        let pct = price_percent.unwrap_or(self.band_pct);
        let book = self.connector.get_order_book(symbol).await?;
        let start_price = book.best_ask * (Decimal::ONE - pct / dec!(100));
        let end_price = book.best_bid;
        self.place_ladder(LadderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            total_size,
            num_orders,
            start_price,
            end_price,
            skew,
            reduce_only: false,
            check_market: false,
        })
        .await
    }

    /// Derives a sell band from the live book — from the best ask up to
    /// `price_percent` above the best bid.
    pub async fn market_aware_sell(
        &self,
        symbol: &str,
        total_size: Decimal,
        num_orders: usize,
        price_percent: Option<Decimal>,
        skew: f64,
    ) -> Result<LadderReport, ExecutionError> {
        let pct = price_percent.unwrap_or(self.band_pct);
        let book = self.connector.get_order_book(symbol).await?;
        let start_price = book.best_ask;
        let end_price = book.best_bid * (Decimal::ONE + pct / dec!(100));
        self.place_ladder(LadderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            total_size,
            num_orders,
            start_price,
            end_price,
            skew,
            reduce_only: false,
            check_market: false,
        })
        .await
    }

    /// Clamps the requested band against the live book. This is a clamp, not
    /// a rejection: a band that fully crosses the book collapses to the
    /// opposite touch price and the orders still proceed. A failed book fetch
    /// warns and leaves the band untouched.
    async fn clamp_to_book(&self, req: &mut LadderRequest) {
        let book = match self.connector.get_order_book(&req.symbol).await {
            Ok(book) => book,
            Err(e) => {
                warn!(symbol = %req.symbol, %e, "could not check market, continuing with requested prices");
                return;
            }
        };
        info!(symbol = %req.symbol, bid = %book.best_bid, ask = %book.best_ask, "current market");

        if req.side.is_buy() {
            let cap = book.best_ask * (Decimal::ONE + MAX_BAND_RATIO);
            if req.start_price > cap {
                warn!(start = %req.start_price, %cap, "start price too far above ask, clamping");
                req.start_price = cap;
            }
            if req.end_price > book.best_ask {
                warn!(end = %req.end_price, "end price above best ask, collapsing to best bid");
                req.end_price = book.best_bid;
            }
        } else {
            let floor = book.best_bid * (Decimal::ONE - MAX_BAND_RATIO);
            if req.start_price < floor {
                warn!(start = %req.start_price, %floor, "start price too far below bid, clamping");
                req.start_price = floor;
            }
            if req.end_price < book.best_bid {
                warn!(end = %req.end_price, "end price below best bid, collapsing to best ask");
                req.end_price = book.best_ask;
            }
        }
    }
}

fn validate(req: &LadderRequest) -> Result<(), ExecutionError> {
    if req.total_size <= Decimal::ZERO {
        return Err(ExecutionError::InvalidParams(
            "total size must be greater than 0".to_string(),
        ));
    }
    if req.num_orders == 0 {
        return Err(ExecutionError::InvalidParams(
            "number of orders must be greater than 0".to_string(),
        ));
    }
    if req.start_price <= Decimal::ZERO || req.end_price <= Decimal::ZERO {
        return Err(ExecutionError::InvalidParams(
            "prices must be greater than 0".to_string(),
        ));
    }
    if req.skew < 0.0 {
        return Err(ExecutionError::InvalidParams(
            "skew must be non-negative".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use api_client::InstrumentPrecision;

    fn driver(mock: &Arc<MockConnector>) -> ScaledOrderDriver {
        mock.set_precision(InstrumentPrecision {
            size_decimals: 4,
            price_decimals: 2,
            is_derivative: true,
        });
        let settings = ExecutionSettings {
            order_delay_ms: 0,
            ..ExecutionSettings::default()
        };
        ScaledOrderDriver::new(Arc::clone(mock) as Arc<dyn ExchangeConnector>, &settings)
    }

    fn buy_request() -> LadderRequest {
        LadderRequest {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            total_size: dec!(1.0),
            num_orders: 5,
            start_price: dec!(100),
            end_price: dec!(80),
            skew: 0.0,
            reduce_only: false,
            check_market: false,
        }
    }

    #[tokio::test]
    async fn rejects_bad_parameters_before_any_io() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        for req in [
            LadderRequest { total_size: dec!(0), ..buy_request() },
            LadderRequest { num_orders: 0, ..buy_request() },
            LadderRequest { start_price: dec!(0), ..buy_request() },
            LadderRequest { skew: -1.0, ..buy_request() },
        ] {
            assert!(matches!(
                driver.place_ladder(req).await,
                Err(ExecutionError::InvalidParams(_))
            ));
        }
        assert!(mock.submitted().is_empty());
    }

    #[tokio::test]
    async fn places_an_even_ladder() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        let report = driver.place_ladder(buy_request()).await.unwrap();
        assert_eq!(report.successful_orders, 5);
        assert_eq!(report.total_orders, 5);
        assert_eq!(report.sizes, vec![dec!(0.2); 5]);
        assert_eq!(
            report.prices,
            vec![dec!(100), dec!(95), dec!(90), dec!(85), dec!(80)]
        );
        assert_eq!(mock.submitted().len(), 5);
    }

    #[tokio::test]
    async fn one_rejected_rung_does_not_abort_the_rest() {
        let mock = Arc::new(MockConnector::new());
        mock.reject_submission(2);
        let driver = driver(&mock);

        let report = driver.place_ladder(buy_request()).await.unwrap();
        assert_eq!(report.successful_orders, 4);
        assert_eq!(report.total_orders, 5);
        assert!(!report.results[2].accepted);
        assert_eq!(mock.submitted().len(), 5);
    }

    #[tokio::test]
    async fn inverted_band_is_swapped() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        let report = driver
            .place_ladder(LadderRequest {
                start_price: dec!(80),
                end_price: dec!(100),
                ..buy_request()
            })
            .await
            .unwrap();
        assert_eq!(report.prices.first(), Some(&dec!(100)));
        assert_eq!(report.prices.last(), Some(&dec!(80)));
    }

    #[tokio::test]
    async fn crossing_buy_band_is_clamped_to_the_book() {
        let mock = Arc::new(MockConnector::new());
        mock.set_book(dec!(99), dec!(100));
        let driver = driver(&mock);

        let report = driver
            .place_ladder(LadderRequest {
                start_price: dec!(120),
                end_price: dec!(110),
                check_market: true,
                ..buy_request()
            })
            .await
            .unwrap();
        // Start clamps to ask * 1.05, end collapses to the best bid.
        assert_eq!(report.prices.first(), Some(&dec!(105)));
        assert_eq!(report.prices.last(), Some(&dec!(99)));
        assert_eq!(report.successful_orders, 5);
    }

    #[tokio::test]
    async fn book_failure_warns_and_proceeds_unclamped() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        let report = driver
            .place_ladder(LadderRequest { check_market: true, ..buy_request() })
            .await
            .unwrap();
        assert_eq!(report.successful_orders, 5);
        assert_eq!(report.prices.first(), Some(&dec!(100)));
    }

    #[tokio::test]
    async fn leveraged_ladder_sets_leverage_first() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        driver
            .place_ladder_leveraged(buy_request(), 10)
            .await
            .unwrap();
        assert_eq!(mock.leverage_calls(), vec![("ETHUSDT".to_string(), 10)]);
        assert_eq!(mock.submitted().len(), 5);
    }

    #[tokio::test]
    async fn market_aware_buy_brackets_the_touch() {
        let mock = Arc::new(MockConnector::new());
        mock.set_book(dec!(99), dec!(100));
        let driver = driver(&mock);

        let report = driver
            .market_aware_buy("ETHUSDT", dec!(1.0), 3, Some(dec!(3)), 0.0)
            .await
            .unwrap();
        // Band is [ask * 0.97, best_bid]; the swap puts the higher price first.
        assert_eq!(report.prices.first(), Some(&dec!(99)));
        assert_eq!(report.prices.last(), Some(&dec!(97)));
    }

    #[tokio::test]
    async fn market_aware_sell_requires_a_book() {
        let mock = Arc::new(MockConnector::new());
        let driver = driver(&mock);

        assert!(matches!(
            driver.market_aware_sell("ETHUSDT", dec!(1), 3, None, 0.0).await,
            Err(ExecutionError::Api(_))
        ));
    }
}
