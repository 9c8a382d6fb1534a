//! Out-of-band blob store for file messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lanchat_shared::FileHandle;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::NetError;

/// Stores byte blobs and hands back opaque handles for them.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<FileHandle, NetError>;

    async fn download(&self, handle: &FileHandle) -> Result<Vec<u8>, NetError>;
}

#[derive(Deserialize)]
struct UploadResponse {
    filename: String,
}

/// Client for the relay's `/upload` and `/files/{handle}` endpoints.
#[derive(Debug, Clone)]
pub struct HttpFileStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFileStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url)
    }

    pub fn download_url(&self, handle: &FileHandle) -> String {
        format!("{}/files/{}", self.base_url, handle)
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<FileHandle, NetError> {
        let size = data.len();
        let part = reqwest::multipart::Part::bytes(data).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NetError::Upload(format!(
                "server responded {}",
                resp.status()
            )));
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| NetError::Upload(format!("invalid response: {e}")))?;
        if body.filename.is_empty() {
            return Err(NetError::Upload("server returned an empty handle".into()));
        }

        info!(file = file_name, size, handle = %body.filename, "File uploaded");
        Ok(FileHandle(body.filename))
    }

    async fn download(&self, handle: &FileHandle) -> Result<Vec<u8>, NetError> {
        let resp = self.client.get(self.download_url(handle)).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NetError::NotFound(handle.to_string()));
        }
        let resp = resp.error_for_status()?;
        let bytes = resp.bytes().await?;
        debug!(handle = %handle, size = bytes.len(), "File downloaded");
        Ok(bytes.to_vec())
    }
}

/// Process-local store, for tests and offline demos.
#[derive(Default)]
pub struct MemoryFileStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    uploads: AtomicUsize,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Upload attempts so far, failed ones included.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<FileHandle, NetError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetError::Upload("store unavailable".into()));
        }

        let handle = format!("{}-{}", self.uploads.load(Ordering::SeqCst), file_name);
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| NetError::Upload("store lock poisoned".into()))?;
        blobs.insert(handle.clone(), data);
        Ok(FileHandle(handle))
    }

    async fn download(&self, handle: &FileHandle) -> Result<Vec<u8>, NetError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| NetError::NotFound(handle.to_string()))?;
        blobs
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| NetError::NotFound(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryFileStore::new();
        let handle = store.upload("a.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.download(&handle).await.unwrap(), b"hello");
        assert_eq!(store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failure_and_missing() {
        let store = MemoryFileStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.upload("a.txt", vec![1]).await,
            Err(NetError::Upload(_))
        ));
        assert_eq!(store.upload_count(), 1);

        let missing = FileHandle("nope".into());
        assert!(matches!(
            store.download(&missing).await,
            Err(NetError::NotFound(_))
        ));
    }

    #[test]
    fn test_http_urls() {
        let store = HttpFileStore::new("http://relay:3001/");
        assert_eq!(store.upload_url(), "http://relay:3001/upload");
        assert_eq!(
            store.download_url(&FileHandle("abc".into())),
            "http://relay:3001/files/abc"
        );
    }
}
