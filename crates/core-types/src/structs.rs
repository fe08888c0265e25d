use crate::enums::{OrderSide, OrderType, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A primitive order as handed to the exchange connector.
///
/// An `OrderRequest` is immutable once built; the drivers construct a fresh
/// request for every rung, slice, or grid level they submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: Decimal,
    /// Absent for market orders.
    pub price: Option<Decimal>,
    pub leverage: u8,
    /// Restricts the order to only ever decrease an existing position.
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// A GTC limit order with default leverage.
    pub fn limit(symbol: impl Into<String>, side: OrderSide, size: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            size,
            price: Some(price),
            leverage: 1,
            reduce_only: false,
            time_in_force: TimeInForce::Gtc,
        }
    }

    /// A market order with default leverage.
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            size,
            price: None,
            leverage: 1,
            reduce_only: false,
            time_in_force: TimeInForce::Ioc,
        }
    }

    pub fn reduce_only(mut self, flag: bool) -> Self {
        self.reduce_only = flag;
        self
    }
}

/// The outcome of a single order submission.
///
/// Produced exactly once per submission and never mutated. A venue-level
/// rejection is an `accepted == false` result carrying the raw reason; it is
/// not a transport error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub accepted: bool,
    /// The venue-assigned order id, when the order was accepted onto the book.
    pub order_id: Option<u64>,
    pub filled_size: Decimal,
    pub avg_price: Decimal,
    pub error: Option<String>,
}

impl OrderResult {
    /// A result recording a rejected or failed submission.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            order_id: None,
            filled_size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            error: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn limit_request_carries_price() {
        let req = OrderRequest::limit("ETH", OrderSide::Buy, dec!(0.5), dec!(2000));
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.price, Some(dec!(2000)));
        assert_eq!(req.time_in_force, TimeInForce::Gtc);
        assert!(!req.reduce_only);
    }

    #[test]
    fn market_request_has_no_price() {
        let req = OrderRequest::market("ETH", OrderSide::Sell, dec!(1)).reduce_only(true);
        assert_eq!(req.order_type, OrderType::Market);
        assert!(req.price.is_none());
        assert!(req.reduce_only);
    }

    #[test]
    fn rejected_result_is_empty() {
        let res = OrderResult::rejected("insufficient margin");
        assert!(!res.accepted);
        assert_eq!(res.filled_size, Decimal::ZERO);
        assert_eq!(res.error.as_deref(), Some("insufficient margin"));
    }
}
