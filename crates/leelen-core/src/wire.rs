//! The LEELEN VoIP wire frame: an 8-byte binary header (4-byte little-endian
//! code, 4-byte little-endian dialog id) followed by a `\n`-delimited
//! `Key=Value` text body.

use std::fmt;

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::number::LeelenNumber;

pub const HEADER_SIZE: usize = 8;
pub const MAX_MESSAGE_LENGTH: usize = 1200;
/// Smallest legal body: `"From=?\nTo=\n"` with both numbers empty.
const MIN_BODY: &str = "From=?\nTo=\n";
pub const MIN_MESSAGE_LENGTH: usize = HEADER_SIZE + MIN_BODY.len();

/// The device-to-device request/response codes carried in a frame's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeelenCode {
    Call,
    View,
    Ok,
    Bye,
    Accepted,
    OpenGate,
    VoiceMessage,
    /// A syntactically valid code this bridge does not assign meaning to.
    Unknown(u32),
}

impl LeelenCode {
    const CALL: u32 = 0x001;
    const VIEW: u32 = 0x002;
    const OK: u32 = 0x110;
    const BYE: u32 = 0x214;
    const ACCEPTED: u32 = 0x215;
    const OPEN_GATE: u32 = 0x216;
    const VOICE_MESSAGE: u32 = 0x217;

    pub fn to_u32(self) -> u32 {
        match self {
            LeelenCode::Call => Self::CALL,
            LeelenCode::View => Self::VIEW,
            LeelenCode::Ok => Self::OK,
            LeelenCode::Bye => Self::BYE,
            LeelenCode::Accepted => Self::ACCEPTED,
            LeelenCode::OpenGate => Self::OPEN_GATE,
            LeelenCode::VoiceMessage => Self::VOICE_MESSAGE,
            LeelenCode::Unknown(v) => v,
        }
    }

    /// `true` for the codes that initiate an invitation-style dialog
    /// (`CALL`/`VIEW`/`VOICE_MESSAGE`/`ACCEPTED`).
    pub fn is_invite_like(self) -> bool {
        matches!(
            self,
            LeelenCode::Call | LeelenCode::View | LeelenCode::VoiceMessage | LeelenCode::Accepted
        )
    }
}

impl From<u32> for LeelenCode {
    fn from(value: u32) -> Self {
        match value {
            Self::CALL => LeelenCode::Call,
            Self::VIEW => LeelenCode::View,
            Self::OK => LeelenCode::Ok,
            Self::BYE => LeelenCode::Bye,
            Self::ACCEPTED => LeelenCode::Accepted,
            Self::OPEN_GATE => LeelenCode::OpenGate,
            Self::VOICE_MESSAGE => LeelenCode::VoiceMessage,
            other => LeelenCode::Unknown(other),
        }
    }
}

impl fmt::Display for LeelenCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeelenCode::Call => "CALL",
            LeelenCode::View => "VIEW",
            LeelenCode::Ok => "OK",
            LeelenCode::Bye => "BYE",
            LeelenCode::Accepted => "ACCEPTED",
            LeelenCode::OpenGate => "OPEN_GATE",
            LeelenCode::VoiceMessage => "VOICE_MESSAGE",
            LeelenCode::Unknown(v) => return write!(f, "UNKNOWN(0x{v:03x})"),
        };
        f.write_str(name)
    }
}

/// A parsed LEELEN VoIP message: header plus whatever body fields were
/// present. Every field is optional; the sender decides which fields a
/// given code needs.
#[derive(Debug, Clone, Default)]
pub struct LeelenMessage {
    pub code: Option<LeelenCode>,
    pub id: u32,
    pub from: Option<LeelenNumber>,
    pub from_type: Option<u32>,
    pub to: Option<LeelenNumber>,
    pub audio: Vec<String>,
    pub video: Vec<String>,
    pub audio_port: Option<u16>,
    pub video_port: Option<u16>,
}

impl LeelenMessage {
    pub fn new(code: LeelenCode, id: u32) -> Self {
        LeelenMessage {
            code: Some(code),
            id,
            ..Default::default()
        }
    }

    /// Serialise header + body. Format lines are only emitted when their
    /// array is non-empty, matching the C reference implementation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let code = self.code.map(LeelenCode::to_u32).unwrap_or(0);
        let mut out = Vec::with_capacity(HEADER_SIZE + 64);
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());

        if let Some(from) = &self.from {
            out.extend_from_slice(format!("From={}?{}\n", from, self.from_type.unwrap_or(0)).as_bytes());
        }
        if let Some(to) = &self.to {
            out.extend_from_slice(format!("To={}\n", to).as_bytes());
        }
        for fmt in &self.audio {
            out.extend_from_slice(format!("Audio={}\n", fmt).as_bytes());
        }
        for fmt in &self.video {
            out.extend_from_slice(format!("Video={}\n", fmt).as_bytes());
        }
        if !self.audio.is_empty() {
            if let Some(port) = self.audio_port {
                out.extend_from_slice(format!("AudioPort={}\n", port).as_bytes());
            }
        }
        if !self.video.is_empty() {
            if let Some(port) = self.video_port {
                out.extend_from_slice(format!("VideoPort={}\n", port).as_bytes());
            }
        }
        out
    }

    /// Parse a complete wire frame (header + body).
    pub fn from_bytes(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < MIN_MESSAGE_LENGTH {
            return Err(CoreError::FrameTooShort {
                min: MIN_MESSAGE_LENGTH,
                actual: buf.len(),
            });
        }
        if buf.len() > MAX_MESSAGE_LENGTH {
            return Err(CoreError::FrameTooLong {
                max: MAX_MESSAGE_LENGTH,
                actual: buf.len(),
            });
        }
        if &buf[HEADER_SIZE..HEADER_SIZE + 5] != b"From=" {
            return Err(CoreError::MalformedFrame("body does not start with \"From=\"".to_string()));
        }

        let code = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let id = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let body = String::from_utf8_lossy(&buf[HEADER_SIZE..]);

        let mut msg = LeelenMessage {
            code: Some(LeelenCode::from(code)),
            id,
            ..Default::default()
        };

        for line in body.split('\n') {
            if line.is_empty() {
                continue;
            }
            msg.apply_line(line)?;
        }
        Ok(msg)
    }

    fn apply_line(&mut self, line: &str) -> CoreResult<()> {
        if let Some(rest) = line.strip_prefix("From=") {
            let (number, device_type) = match rest.split_once('?') {
                Some((n, t)) => (n, t.parse().ok()),
                None => (rest, None),
            };
            self.from = LeelenNumber::parse(number, None).ok();
            self.from_type = device_type;
        } else if let Some(rest) = line.strip_prefix("AudioPort=") {
            self.audio_port = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("VideoPort=") {
            self.video_port = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("Audio=") {
            self.audio.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("Video=") {
            self.video.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("To=") {
            self.to = LeelenNumber::parse(rest, None).ok();
        } else if line.starts_with("Resolution=") {
            // Recognised but carries no information this bridge needs.
        } else {
            debug!(%line, "ignoring unrecognised LEELEN message field");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_number() -> LeelenNumber {
        LeelenNumber::parse("1001-0203", None).unwrap()
    }

    #[test]
    fn round_trips_call_message() {
        let mut msg = LeelenMessage::new(LeelenCode::Call, 42);
        msg.from = Some(sample_number());
        msg.from_type = Some(1);
        msg.to = Some(LeelenNumber::parse("1001-0204", None).unwrap());
        msg.audio = vec!["PCMU/8000".into()];
        msg.video = vec!["H264/90000".into()];
        msg.audio_port = Some(7078);
        msg.video_port = Some(9078);

        let bytes = msg.to_bytes();
        let parsed = LeelenMessage::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.code, Some(LeelenCode::Call));
        assert_eq!(parsed.id, 42);
        assert_eq!(parsed.from, msg.from);
        assert_eq!(parsed.from_type, Some(1));
        assert_eq!(parsed.to, msg.to);
        assert_eq!(parsed.audio, msg.audio);
        assert_eq!(parsed.video, msg.video);
        assert_eq!(parsed.audio_port, Some(7078));
        assert_eq!(parsed.video_port, Some(9078));
    }

    #[test]
    fn omits_port_lines_when_no_formats() {
        let mut msg = LeelenMessage::new(LeelenCode::Ok, 1);
        msg.audio_port = Some(7078);
        let bytes = msg.to_bytes();
        let body = String::from_utf8_lossy(&bytes[HEADER_SIZE..]);
        assert!(!body.contains("AudioPort"));
    }

    #[test]
    fn rejects_frame_below_minimum_length() {
        let buf = [0u8; HEADER_SIZE];
        assert!(matches!(
            LeelenMessage::from_bytes(&buf),
            Err(CoreError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let buf = vec![0u8; MAX_MESSAGE_LENGTH + 1];
        assert!(matches!(
            LeelenMessage::from_bytes(&buf),
            Err(CoreError::FrameTooLong { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_skipped_not_fatal() {
        let mut buf = LeelenCode::Bye.to_u32().to_le_bytes().to_vec();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(b"From=?\nMystery=42\nTo=1001-0203\n");
        let parsed = LeelenMessage::from_bytes(&buf).unwrap();
        assert_eq!(parsed.to, Some(sample_number()));
    }

    #[test]
    fn unknown_code_round_trips_as_unknown() {
        let mut msg = LeelenMessage::new(LeelenCode::Unknown(0xdead), 1);
        msg.from = Some(sample_number());
        msg.from_type = Some(1);
        msg.to = Some(sample_number());
        let bytes = msg.to_bytes();
        let parsed = LeelenMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.code, Some(LeelenCode::Unknown(0xdead)));
    }

    #[test]
    fn rejects_frame_whose_body_does_not_start_with_from() {
        let mut buf = LeelenCode::Bye.to_u32().to_le_bytes().to_vec();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(b"To=1001-0203\nXXXXXXX\n");
        assert!(matches!(LeelenMessage::from_bytes(&buf), Err(CoreError::MalformedFrame(_))));
    }
}
