use crate::error::ApiError;
use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Public, venue-agnostic shapes returned by the `ExchangeConnector` trait.
// ============================================================================

/// One resting order as reported by the venue.
#[derive(Debug, Clone, Serialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: u64,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: String,
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// A snapshot of the top of the book plus a few depth levels.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBook {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }
}

/// Precision metadata for one instrument.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InstrumentPrecision {
    pub size_decimals: u32,
    pub price_decimals: u32,
    pub is_derivative: bool,
}

// ============================================================================
// Wire-format structs, deserialized straight from the venue's JSON.
// Using `#[serde(rename_all = "camelCase")]` to map camelCase to snake_case.
// ============================================================================

/// The response from a successful order placement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub orig_qty: Decimal,
    pub price: Decimal,
    pub side: String,
    // There are more fields, but these are the ones we act on.
}

/// One entry of the open-order listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub side: String,
    pub orig_qty: Decimal,
    pub price: Decimal,
    pub status: String,
}

impl OpenOrderResponse {
    pub fn into_open_order(self) -> Result<OpenOrder, ApiError> {
        Ok(OpenOrder {
            order_id: u64::try_from(self.order_id)
                .map_err(|_| ApiError::InvalidData(format!("negative order id {}", self.order_id)))?,
            symbol: self.symbol,
            side: parse_side(&self.side)?,
            size: self.orig_qty,
            price: self.price,
            status: self.status,
        })
    }
}

/// An order-book depth snapshot; levels arrive as `[price, size]` string pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

impl DepthResponse {
    pub fn into_order_book(self) -> Result<OrderBook, ApiError> {
        let bids = parse_levels(&self.bids)?;
        let asks = parse_levels(&self.asks)?;
        let best_bid = bids
            .first()
            .map(|l| l.price)
            .ok_or_else(|| ApiError::InvalidData("order book has no bids".to_string()))?;
        let best_ask = asks
            .first()
            .map(|l| l.price)
            .ok_or_else(|| ApiError::InvalidData("order book has no asks".to_string()))?;
        Ok(OrderBook { best_bid, best_ask, bids, asks })
    }
}

/// Best bid/ask from the book ticker endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTickerResponse {
    pub bid_price: Decimal,
    pub ask_price: Decimal,
}

/// The slice of the exchange-info payload we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    #[serde(default)]
    pub contract_type: Option<String>,
}

/// Represents an error response from the venue's API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub msg: String,
}

pub(crate) fn parse_side(raw: &str) -> Result<OrderSide, ApiError> {
    match raw {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(ApiError::InvalidData(format!("unknown order side '{other}'"))),
    }
}

fn parse_levels(raw: &[(String, String)]) -> Result<Vec<BookLevel>, ApiError> {
    raw.iter()
        .map(|(px, sz)| {
            Ok(BookLevel {
                price: Decimal::from_str(px)
                    .map_err(|e| ApiError::Deserialization(e.to_string()))?,
                size: Decimal::from_str(sz)
                    .map_err(|e| ApiError::Deserialization(e.to_string()))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn depth_converts_to_order_book() {
        let depth = DepthResponse {
            bids: vec![("99.5".to_string(), "2".to_string())],
            asks: vec![("100.5".to_string(), "3".to_string())],
        };
        let book = depth.into_order_book().unwrap();
        assert_eq!(book.best_bid, dec!(99.5));
        assert_eq!(book.best_ask, dec!(100.5));
        assert_eq!(book.mid(), dec!(100));
    }

    #[test]
    fn empty_side_is_invalid() {
        let depth = DepthResponse {
            bids: vec![],
            asks: vec![("100.5".to_string(), "3".to_string())],
        };
        assert!(matches!(depth.into_order_book(), Err(ApiError::InvalidData(_))));
    }

    #[test]
    fn side_parsing() {
        assert_eq!(parse_side("BUY").unwrap(), OrderSide::Buy);
        assert_eq!(parse_side("SELL").unwrap(), OrderSide::Sell);
        assert!(parse_side("HOLD").is_err());
    }
}
