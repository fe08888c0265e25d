use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

/// Credentials and endpoint selection for the exchange connector.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub production: ApiKeys,
    pub testnet: ApiKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeys {
    pub key: String,
    pub secret: String,
}

/// Tuning knobs for the execution core.
///
/// Every field has a sensible default so a `config.toml` only needs to name
/// the values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Pause between consecutive ladder rung submissions, to respect venue
    /// rate limits.
    pub order_delay_ms: u64,
    /// Cadence of the grid monitor's open-order poll.
    pub grid_poll_secs: u64,
    /// Flat resting size placed at every grid level.
    pub grid_level_size: Decimal,
    /// Default band width for market-aware scaled orders, in percent of the
    /// touch price.
    pub market_band_pct: Decimal,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            order_delay_ms: 100,
            grid_poll_secs: 10,
            grid_level_size: dec!(1),
            market_band_pct: dec!(3),
        }
    }
}
