//! Just enough SDP to bridge LEELEN's flat format lists: the media
//! direction (audio/video), port and ordered `rtpmap` codec names. No
//! support for anything else an offer/answer might carry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub port: u16,
    /// `a=rtpmap` payload descriptions in the order they appeared, e.g.
    /// `"PCMU/8000"`.
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub connection_addr: Option<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn audio(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.kind == MediaKind::Audio)
    }

    pub fn video(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.kind == MediaKind::Video)
    }

    /// Parse the subset of SDP this bridge understands: `c=`, `m=audio`/
    /// `m=video` lines and their associated `a=rtpmap` attributes.
    pub fn parse(body: &str) -> Self {
        let mut sdp = SessionDescription::default();
        let mut current: Option<usize> = None;
        let mut payload_types: Vec<String> = Vec::new();

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("c=") {
                // c=IN IP4 192.0.2.1
                if let Some(addr) = rest.rsplit(' ').next() {
                    sdp.connection_addr = Some(addr.to_string());
                }
            } else if let Some(rest) = line.strip_prefix("m=") {
                let mut parts = rest.split_whitespace();
                let kind = match parts.next() {
                    Some("audio") => MediaKind::Audio,
                    Some("video") => MediaKind::Video,
                    _ => {
                        current = None;
                        continue;
                    }
                };
                let port: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                payload_types = parts.skip(1).map(|s| s.to_string()).collect();
                sdp.media.push(MediaDescription {
                    kind,
                    port,
                    formats: Vec::new(),
                });
                current = Some(sdp.media.len() - 1);
            } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
                if let Some(idx) = current {
                    if let Some((pt, desc)) = rest.split_once(' ') {
                        if payload_types.iter().any(|p| p == pt) {
                            sdp.media[idx].formats.push(desc.to_string());
                        }
                    }
                }
            }
        }
        sdp
    }

    /// Build an SDP body offering/answering with the given media, assigning
    /// sequential payload type numbers starting at 0.
    pub fn build(origin_addr: &str, media: &[MediaDescription]) -> String {
        let mut out = String::new();
        out.push_str("v=0\r\n");
        out.push_str(&format!("o=- 0 0 IN IP4 {}\r\n", origin_addr));
        out.push_str("s=-\r\n");
        out.push_str(&format!("c=IN IP4 {}\r\n", origin_addr));
        out.push_str("t=0 0\r\n");
        for m in media {
            let payload_types: Vec<String> = (0..m.formats.len()).map(|i| (96 + i).to_string()).collect();
            out.push_str(&format!(
                "m={} {} RTP/AVP {}\r\n",
                m.kind,
                m.port,
                payload_types.join(" ")
            ));
            for (pt, fmt) in payload_types.iter().zip(&m.formats) {
                out.push_str(&format!("a=rtpmap:{} {}\r\n", pt, fmt));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\no=- 0 0 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 7078 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\nm=video 9078 RTP/AVP 99\r\na=rtpmap:99 H264/90000\r\n";

    #[test]
    fn parses_audio_and_video_rtpmap() {
        let sdp = SessionDescription::parse(SAMPLE);
        assert_eq!(sdp.connection_addr.as_deref(), Some("192.0.2.1"));
        assert_eq!(sdp.audio().unwrap().port, 7078);
        assert_eq!(sdp.audio().unwrap().formats, vec!["PCMU/8000"]);
        assert_eq!(sdp.video().unwrap().formats, vec!["H264/90000"]);
    }

    #[test]
    fn builds_then_reparses_round_trip() {
        let media = vec![MediaDescription {
            kind: MediaKind::Audio,
            port: 7078,
            formats: vec!["PCMU/8000".to_string()],
        }];
        let body = SessionDescription::build("192.0.2.9", &media);
        let parsed = SessionDescription::parse(&body);
        assert_eq!(parsed.audio().unwrap().port, 7078);
        assert_eq!(parsed.audio().unwrap().formats, vec!["PCMU/8000"]);
    }
}
