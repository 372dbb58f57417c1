use thiserror::Error;

/// Failure of a single HTTP exchange with a device.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),
    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus(status.as_u16())
        } else if err.is_decode() || err.is_body() {
            TransportError::MalformedBody(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("refusing to store {1} for {0}")]
    NonFinite(String, f64),
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Device {0}: IP address not available")]
    MissingAddress(String),
    #[error("invalid device address {0:?}: {1}")]
    InvalidAddress(String, String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
