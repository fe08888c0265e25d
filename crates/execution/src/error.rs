use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Campaign '{0}' not found")]
    CampaignNotFound(String),

    #[error("Campaign '{id}' is {state}")]
    InvalidState { id: String, state: String },

    #[error("Could not determine current price for {0}")]
    NoPrice(String),

    #[error("API client error: {0}")]
    Api(#[from] api_client::error::ApiError),
}
