/// Shared error type used across all pushkeeper crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid app key: {0}")]
    InvalidAppKey(String),

    #[error("device token is required")]
    MissingToken,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
