//! Length-prefixed framing for agent → monitor messages.
//!
//! Wire format: `[HEADER_SIZE bytes: ASCII decimal length, zero padded][payload]`
//!
//! ```text
//! 0        4                                 32
//! ┌────────┬──────────────────────────────────┬──────────────────────┐
//! │ "1200" │ 00 00 00 ... 00                  │ 1200 bytes payload   │
//! └────────┴──────────────────────────────────┴──────────────────────┘
//! ```
//!
//! The agent's name at handshake and every captured frame travel this way.
//! A header whose digits do not parse is reported as
//! [`FramedMessage::Unparsable`] and no payload is read for it.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use lookout_core::config::{DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN};
use lookout_core::NetworkConfig;

use crate::token::trim_padding;

/// One decoded unit from the agent stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramedMessage {
    /// A complete payload (possibly empty).
    Payload(Bytes),
    /// The header did not hold a decimal length. Not fatal; the reader
    /// moves on to the next header.
    Unparsable { header: String },
}

/// Errors that end the stream.
#[derive(Debug, Error)]
pub enum FramerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("length {len} does not fit in a {header_size}-byte header")]
    HeaderOverflow { len: usize, header_size: usize },

    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Payload(usize),
}

/// `Decoder`/`Encoder` for the length-prefixed format.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    header_size: usize,
    max_frame_len: usize,
    state: DecodeState,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(header_size: usize, max_frame_len: usize) -> Self {
        Self {
            header_size,
            max_frame_len,
            state: DecodeState::Header,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.header_size, config.max_frame_len)
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    fn encode_payload(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FramerError> {
        let len = payload.len();
        if len > self.max_frame_len {
            return Err(FramerError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let digits = len.to_string();
        if digits.len() > self.header_size {
            return Err(FramerError::HeaderOverflow {
                len,
                header_size: self.header_size,
            });
        }

        dst.reserve(self.header_size + len);
        dst.put_slice(digits.as_bytes());
        dst.put_bytes(0, self.header_size - digits.len());
        dst.put_slice(payload);
        Ok(())
    }
}

/// Parses a length header.
///
/// Returns `None` (the "no frame" case, length −1 on the wire side) when the
/// trimmed header is empty or not a non-negative decimal number.
pub fn parse_length_header(header: &[u8]) -> Option<usize> {
    let digits = trim_padding(header);
    if digits.is_empty() {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse::<usize>().ok()
}

impl Decoder for FrameCodec {
    type Item = FramedMessage;
    type Error = FramerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.state {
            DecodeState::Header => {
                // Partial headers stay buffered until the full header arrives.
                if src.len() < self.header_size {
                    src.reserve(self.header_size - src.len());
                    return Ok(None);
                }

                let header = src.split_to(self.header_size);
                let Some(len) = parse_length_header(&header) else {
                    return Ok(Some(FramedMessage::Unparsable {
                        header: String::from_utf8_lossy(trim_padding(&header)).into_owned(),
                    }));
                };

                if len > self.max_frame_len {
                    return Err(FramerError::FrameTooLarge {
                        len,
                        max: self.max_frame_len,
                    });
                }

                self.state = DecodeState::Payload(len);
                len
            }
            DecodeState::Payload(len) => len,
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.state = DecodeState::Header;
        Ok(Some(FramedMessage::Payload(src.split_to(len).freeze())))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.state == DecodeState::Header => Ok(None),
            None => Err(FramerError::UnexpectedEof {
                buffered: buf.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FramerError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_payload(&item, dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FramerError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_payload(item, dst)
    }
}
