use lanchat_net::NetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Display name is empty")]
    EmptyName,

    #[error("Frame dropped by the transport")]
    Dropped,

    #[error("Upload failed: {0}")]
    Upload(#[source] NetError),

    #[error("Download failed: {0}")]
    Download(#[source] NetError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
