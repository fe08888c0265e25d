use crate::auth::sign_request;
use crate::error::ApiError;
use async_trait::async_trait;
use configuration::settings::ApiConfig;
use core_types::{OrderRequest, OrderResult, OrderSide, OrderType, TimeInForce};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

mod auth;
pub mod error;
pub mod responses;

// --- Public API ---
pub use responses::{BookLevel, InstrumentPrecision, OpenOrder, OrderBook};

/// The generic, abstract interface to the trading venue.
///
/// This trait is the contract the execution core programs against, allowing
/// the underlying implementation (live or mock) to be swapped out. Every
/// failure surfaces as a structured `ApiError`; a venue-level order rejection
/// is not an error but an `OrderResult` with `accepted == false`.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Submits a new order. (Authenticated)
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult, ApiError>;

    /// Cancels a resting order by venue id. (Authenticated)
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ApiError>;

    /// Lists every resting order on the account. (Authenticated)
    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError>;

    /// Fetches a depth snapshot for one symbol. May fail transiently.
    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ApiError>;

    /// Fetches the current mid price for one symbol.
    async fn get_mid_price(&self, symbol: &str) -> Result<Decimal, ApiError>;

    /// Sets the leverage multiplier for a derivative symbol. (Authenticated)
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ApiError>;

    /// Fetches size/price precision metadata for one instrument.
    async fn get_instrument_precision(&self, symbol: &str) -> Result<InstrumentPrecision, ApiError>;
}

/// A concrete `ExchangeConnector` for the venue's derivatives REST API.
#[derive(Clone)]
pub struct VenueClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
}

impl VenueClient {
    pub fn new(live_mode: bool, api_config: &ApiConfig) -> Self {
        let (base_url, keys) = if live_mode {
            ("https://fapi.binance.com".to_string(), &api_config.production)
        } else {
            (
                "https://testnet.binancefuture.com".to_string(),
                &api_config.testnet,
            )
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(&keys.key).expect("Invalid API Key"),
        );

        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .build()
                .expect("Failed to build reqwest client"),
            base_url,
            api_secret: keys.secret.clone(),
        }
    }

    fn signed_url(&self, path: &str, params: &mut BTreeMap<&str, String>) -> Result<String, ApiError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        params.insert("timestamp", timestamp.to_string());

        let query_string =
            serde_qs::to_string(params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let signature = sign_request(&self.api_secret, &query_string);

        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, body = %text, "venue response");

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: responses::ApiErrorResponse =
                serde_json::from_str(&text).map_err(|e| {
                    ApiError::Deserialization(format!(
                        "Failed to deserialize error response: {}. Original text: {}",
                        e, text
                    ))
                })?;
            Err(ApiError::Venue(api_error.code, api_error.msg))
        }
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.post(&url).send().await?;
        Self::parse_response(response).await
    }

    async fn delete_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.delete(&url).send().await?;
        Self::parse_response(response).await
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl ExchangeConnector for VenueClient {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", order.symbol.clone());
        params.insert(
            "side",
            match order.side {
                OrderSide::Buy => "BUY".to_string(),
                OrderSide::Sell => "SELL".to_string(),
            },
        );
        params.insert("quantity", order.size.to_string());
        if order.reduce_only {
            params.insert("reduceOnly", "true".to_string());
        }
        match order.order_type {
            OrderType::Market => {
                params.insert("type", "MARKET".to_string());
            }
            OrderType::Limit => {
                params.insert("type", "LIMIT".to_string());
                if let Some(price) = order.price {
                    params.insert("price", price.to_string());
                }
                params.insert(
                    "timeInForce",
                    match order.time_in_force {
                        TimeInForce::Gtc => "GTC".to_string(),
                        TimeInForce::Ioc => "IOC".to_string(),
                        TimeInForce::PostOnly => "GTX".to_string(),
                    },
                );
            }
        }

        match self
            .post_signed::<responses::OrderResponse>("/fapi/v1/order", &mut params)
            .await
        {
            Ok(resp) => Ok(OrderResult {
                accepted: resp.status != "REJECTED" && resp.status != "EXPIRED",
                order_id: u64::try_from(resp.order_id).ok(),
                filled_size: resp.executed_qty,
                avg_price: resp.avg_price,
                error: None,
            }),
            // A venue rejection is a structured outcome, not a transport failure.
            Err(ApiError::Venue(code, msg)) => {
                Ok(OrderResult::rejected(format!("venue error {code}: {msg}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());
        self.delete_signed::<serde_json::Value>("/fapi/v1/order", &mut params)
            .await?;
        Ok(())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
        let mut params = BTreeMap::new();
        let raw: Vec<responses::OpenOrderResponse> =
            self.get_signed("/fapi/v1/openOrders", &mut params).await?;
        raw.into_iter().map(|o| o.into_open_order()).collect()
    }

    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ApiError> {
        let depth: responses::DepthResponse = self
            .get_public("/fapi/v1/depth", &[("symbol", symbol), ("limit", "10")])
            .await?;
        depth.into_order_book()
    }

    async fn get_mid_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let ticker: responses::BookTickerResponse = self
            .get_public("/fapi/v1/ticker/bookTicker", &[("symbol", symbol)])
            .await?;
        Ok((ticker.bid_price + ticker.ask_price) / Decimal::TWO)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("leverage", leverage.to_string());

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        #[allow(dead_code)]
        struct LeverageResponse {
            leverage: u8,
            symbol: String,
        }
        self.post_signed::<LeverageResponse>("/fapi/v1/leverage", &mut params)
            .await?;
        Ok(())
    }

    async fn get_instrument_precision(&self, symbol: &str) -> Result<InstrumentPrecision, ApiError> {
        let info: responses::ExchangeInfoResponse = self
            .get_public("/fapi/v1/exchangeInfo", &[("symbol", symbol)])
            .await?;
        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| {
                ApiError::InvalidData(format!("no exchange info returned for {symbol}"))
            })?;
        Ok(InstrumentPrecision {
            size_decimals: symbol_info.quantity_precision,
            price_decimals: symbol_info.price_precision,
            is_derivative: symbol_info
                .contract_type
                .as_deref()
                .is_some_and(|c| !c.is_empty()),
        })
    }
}
