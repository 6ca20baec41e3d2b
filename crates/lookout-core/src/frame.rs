//! Encoded screen-capture frames.

use bytes::Bytes;

/// One encoded screen capture as sent by an agent.
///
/// The core never looks inside the buffer; the image codec belongs to the
/// capture and display collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}
