//! Screen capture collaborator.
//!
//! The agent never decodes what it sends; a capture is an opaque, already
//! encoded image.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to read capture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture unavailable: {0}")]
    Unavailable(String),
}

/// Produces one encoded frame per call.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    async fn capture(&self) -> Result<Bytes, CaptureError>;
}

/// Re-reads an encoded image file on every capture.
///
/// Pairs with any external tool that keeps overwriting the file with the
/// current screen contents.
#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FrameCapture for FileCapture {
    async fn capture(&self) -> Result<Bytes, CaptureError> {
        tokio::fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|source| CaptureError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_capture_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.jpg");
        let capture = FileCapture::new(&path);

        std::fs::write(&path, [1u8; 16]).unwrap();
        assert_eq!(capture.capture().await.unwrap().len(), 16);

        std::fs::write(&path, [2u8; 4]).unwrap();
        assert_eq!(capture.capture().await.unwrap(), Bytes::from_static(&[2u8; 4]));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let capture = FileCapture::new(dir.path().join("nope.jpg"));
        assert!(matches!(
            capture.capture().await,
            Err(CaptureError::Io { .. })
        ));
    }
}
