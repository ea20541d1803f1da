//! Error types for the SecureComm simulator

use thiserror::Error;

/// Main error type for simulator operations
#[derive(Debug, Error)]
pub enum SimError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Packet {0} is still in flight")]
    PacketInFlight(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Record '{0}' is not the selected record")]
    NotSelected(String),

    #[error("Record '{0}' carries no ciphertext")]
    NoCiphertext(String),

    #[error("Relay error: {0}")]
    RelayFailed(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
