//! Monitor → agent control commands.
//!
//! Unlike the agent → monitor direction these are not length-prefixed: each
//! command is one raw write of a token, and a notice is the notice prefix
//! followed directly by its text. The agent recovers them from a bounded
//! read by prefix matching.

use bytes::Bytes;

use crate::token::trim_padding;

pub const START: &str = "LH_START";
pub const STOP: &str = "LH_STOP";
pub const NOTICE_PREFIX: &str = "LH_SENDMSG";

/// A command the monitor pushes to an agent. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Begin sending frames.
    Start,
    /// Stop sending frames.
    Stop,
    /// Show a text notice to the person at the agent station.
    Notice(String),
}

impl ControlCommand {
    /// Wire bytes for a single write.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Start => Bytes::from_static(START.as_bytes()),
            Self::Stop => Bytes::from_static(STOP.as_bytes()),
            Self::Notice(text) => {
                let mut buf = Vec::with_capacity(NOTICE_PREFIX.len() + text.len());
                buf.extend_from_slice(NOTICE_PREFIX.as_bytes());
                buf.extend_from_slice(text.as_bytes());
                Bytes::from(buf)
            }
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Notice(_) => "notice",
        }
    }
}

/// Everything recovered from one control read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBatch {
    /// Commands in the order they were written.
    pub commands: Vec<ControlCommand>,
    /// Trailing bytes that matched nothing, lossily decoded.
    pub unrecognized: Option<String>,
}

impl ControlBatch {
    /// Parses the bytes returned by one bounded read.
    ///
    /// Zero padding is trimmed first. Writes that the transport coalesced
    /// into a single read (`LH_STOPLH_START`) come back as separate commands.
    /// A notice takes the rest of the buffer as its text, so a command the
    /// monitor wrote after it in the same read ends up inside the notice
    /// (`LH_SENDMSGhiLH_STOP` is one notice, `hiLH_STOP`). Parsing stops at
    /// the first unmatched byte; the remainder is reported, not guessed at.
    pub fn parse(buf: &[u8]) -> Self {
        let mut batch = Self::default();
        let mut rest = trim_padding(buf);

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix(START.as_bytes()) {
                batch.commands.push(ControlCommand::Start);
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix(STOP.as_bytes()) {
                batch.commands.push(ControlCommand::Stop);
                rest = tail;
            } else if let Some(text) = rest.strip_prefix(NOTICE_PREFIX.as_bytes()) {
                let text = String::from_utf8_lossy(text).into_owned();
                batch.commands.push(ControlCommand::Notice(text));
                rest = &[];
            } else {
                batch.unrecognized = Some(String::from_utf8_lossy(rest).into_owned());
                rest = &[];
            }
        }

        batch
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.unrecognized.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[..bytes.len()].copy_from_slice(bytes);
        buf
    }

    #[test]
    fn test_encode_tokens() {
        assert_eq!(ControlCommand::Start.encode(), Bytes::from_static(b"LH_START"));
        assert_eq!(ControlCommand::Stop.encode(), Bytes::from_static(b"LH_STOP"));
        assert_eq!(
            ControlCommand::Notice("Pencils down".into()).encode(),
            Bytes::from_static(b"LH_SENDMSGPencils down")
        );
    }

    #[test]
    fn test_parse_single_tokens_with_padding() {
        assert_eq!(
            ControlBatch::parse(&padded(b"LH_START")).commands,
            vec![ControlCommand::Start]
        );
        assert_eq!(
            ControlBatch::parse(&padded(b"LH_STOP")).commands,
            vec![ControlCommand::Stop]
        );
    }

    #[test]
    fn test_parse_notice_takes_remainder() {
        let batch = ControlBatch::parse(&padded(b"LH_SENDMSGPencils down"));
        assert_eq!(
            batch.commands,
            vec![ControlCommand::Notice("Pencils down".into())]
        );
        assert!(batch.unrecognized.is_none());
    }

    #[test]
    fn test_parse_coalesced_commands_in_order() {
        let batch = ControlBatch::parse(b"LH_STOPLH_STARTLH_SENDMSGhi there");
        assert_eq!(
            batch.commands,
            vec![
                ControlCommand::Stop,
                ControlCommand::Start,
                ControlCommand::Notice("hi there".into()),
            ]
        );
    }

    #[test]
    fn test_notice_swallows_trailing_command() {
        let batch = ControlBatch::parse(b"LH_SENDMSGhiLH_STOP");
        assert_eq!(batch.commands, vec![ControlCommand::Notice("hiLH_STOP".into())]);
        assert!(batch.unrecognized.is_none());
    }

    #[test]
    fn test_parse_unrecognized_is_reported() {
        let batch = ControlBatch::parse(b"LH_STARTgarbage");
        assert_eq!(batch.commands, vec![ControlCommand::Start]);
        assert_eq!(batch.unrecognized.as_deref(), Some("garbage"));

        let batch = ControlBatch::parse(b"LH_STA");
        assert!(batch.commands.is_empty());
        assert_eq!(batch.unrecognized.as_deref(), Some("LH_STA"));
    }

    #[test]
    fn test_parse_empty_read() {
        assert!(ControlBatch::parse(&[0u8; 16]).is_empty());
        assert!(ControlBatch::parse(b"").is_empty());
    }

    #[test]
    fn test_notice_roundtrip_keeps_inner_spaces() {
        let cmd = ControlCommand::Notice("  two  spaces".into());
        let batch = ControlBatch::parse(&cmd.encode());
        assert_eq!(batch.commands, vec![cmd]);
    }
}
