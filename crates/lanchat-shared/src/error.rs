use thiserror::Error;

/// Errors raised while decoding inbound frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    Invalid(String),
}
