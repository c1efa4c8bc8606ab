use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ComplianceError {
    #[error("Sanctions list not loaded: {0}")]
    ListNotLoaded(String),

    #[error("Sanctions list could not be read: {0}")]
    ListUnreadable(String),

    #[error("Invalid screening input: {0}")]
    InvalidInput(String),

    #[error("Invalid {network} address: {address}")]
    InvalidAddress { network: String, address: String },

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ComplianceError>;
