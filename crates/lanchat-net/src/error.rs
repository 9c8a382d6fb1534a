use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("File not found: {0}")]
    NotFound(String),
}
