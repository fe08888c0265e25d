use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to execute the HTTP request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The venue rejected the request (code {0}): {1}")]
    Venue(i32, String),

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data returned by the API: {0}")]
    InvalidData(String),
}
