/// Centralized error types for the chart bridge
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket connection failed: {0}")]
    WebSocketError(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    // Messaging Errors
    #[error("Message channel closed before a response arrived")]
    ChannelClosed,

    #[error("Message handler error: {0}")]
    HandlerError(String),

    // Datafeed Errors
    #[error("Datafeed returned status: {0}")]
    DatafeedStatus(String),

    #[error("no data")]
    NoData,

    #[error("Malformed datafeed response: {0}")]
    MalformedResponse(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("unknown_symbol")]
    UnknownSymbol,

    #[error("invalid symbol")]
    InvalidSymbol,

    #[error("Got a JS time instead of Unix one: {0}")]
    MillisecondTimestamp(i64),

    #[error("Not enough bars in history for proper pulse update. Need at least 2, got {0}")]
    InsufficientHistory(usize),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Symbol group `{group}` is malformed at symbol #{index}: {reason}")]
    MalformedSymbolGroup { group: String, index: usize, reason: String },

    // Configuration Errors
    #[error("Unsupported datafeed configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Generic Errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Check if the next poll may succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::HttpError(_)
                | BridgeError::DatafeedStatus(_)
                | BridgeError::NoData
                | BridgeError::WebSocketError(_)
        )
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &str {
        match self {
            BridgeError::HttpError(_) => "NET_001",
            BridgeError::WebSocketError(_) => "NET_002",
            BridgeError::TransportClosed(_) => "NET_003",
            BridgeError::ChannelClosed => "MSG_001",
            BridgeError::HandlerError(_) => "MSG_002",
            BridgeError::DatafeedStatus(_) => "DATA_001",
            BridgeError::NoData => "DATA_002",
            BridgeError::MalformedResponse(_) => "DATA_010",
            BridgeError::DeserializationError(_) => "DATA_003",
            BridgeError::UnknownSymbol => "DATA_004",
            BridgeError::InvalidSymbol => "DATA_005",
            BridgeError::MillisecondTimestamp(_) => "DATA_006",
            BridgeError::InsufficientHistory(_) => "DATA_007",
            BridgeError::InvalidResolution(_) => "DATA_008",
            BridgeError::MalformedSymbolGroup { .. } => "DATA_009",
            BridgeError::UnsupportedConfiguration(_) => "CFG_001",
            BridgeError::ConfigError(_) => "CFG_002",
            BridgeError::InvalidParameter(_) => "CFG_003",
            BridgeError::FileError(_) => "FILE_001",
            BridgeError::InternalError(_) => "INT_001",
        }
    }
}
