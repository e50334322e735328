// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

/// Reasons an inbound SOH…ETB frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame content is not valid ASCII hex")]
    MalformedHex,

    #[error("frame too short: {len} byte(s) after hex decoding")]
    FrameTooShort { len: usize },

    #[error("checksum mismatch: expected {expected:02X}, received {received:02X}")]
    ChecksumMismatch { expected: u8, received: u8 },
}

/// All errors that can occur in the foxtron-dali library.
#[derive(Debug, thiserror::Error)]
pub enum DaliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Malformed message: {details}")]
    MalformedMessage { details: String },

    #[error("Not connected to gateway")]
    NotConnected,

    #[error("Query already in progress: {key}")]
    AlreadyInProgress { key: String },

    #[error("Gateway connection lost")]
    ConnectionLost,

    #[error("Query timeout: {key}")]
    Timeout { key: String },

    #[error("Invalid fade code: {code} (max: 15)")]
    InvalidFadeCode { code: u8 },

    #[error("Invalid short address: {address} (max: 63)")]
    InvalidShortAddress { address: u8 },

    #[error("Invalid DALI level: {level} (max: 254)")]
    InvalidLevel { level: u8 },

    #[error("Invalid DALI command length: {bits} bits (must be 8-64)")]
    InvalidCommandLength { bits: usize },
}

impl DaliError {
    /// Whether this error is transient and the operation may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DaliError::Io(_)
                | DaliError::NotConnected
                | DaliError::ConnectionLost
                | DaliError::Timeout { .. }
        )
    }

    /// Whether this error was raised by local parameter validation, before
    /// anything reached the wire.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DaliError::InvalidFadeCode { .. }
                | DaliError::InvalidShortAddress { .. }
                | DaliError::InvalidLevel { .. }
                | DaliError::InvalidCommandLength { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DaliError>;
