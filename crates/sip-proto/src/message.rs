//! SIP request/response messages: just enough structure for the bridge to
//! read the headers it cares about and to build the handful of
//! requests/responses it sends.

use std::fmt;

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
}

impl SipMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Register => "REGISTER",
            SipMethod::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "REGISTER" => SipMethod::Register,
            "OPTIONS" => SipMethod::Options,
            _ => return None,
        })
    }

    /// `true` for requests that create a transaction the far end will
    /// answer with a final response (everything except `ACK`).
    pub fn is_transactional(self) -> bool {
        !matches!(self, SipMethod::Ack)
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum StartLine {
    Request {
        method: SipMethod,
        request_uri: String,
    },
    Response {
        status_code: u16,
        reason: String,
    },
}

/// A single header, keeping the original name casing since some devices are
/// picky about it while still comparing case-insensitively.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl SipMessage {
    pub fn new_request(method: SipMethod, request_uri: impl Into<String>) -> Self {
        SipMessage {
            start_line: StartLine::Request {
                method,
                request_uri: request_uri.into(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn new_response(status_code: u16, reason: impl Into<String>) -> Self {
        SipMessage {
            start_line: StartLine::Response {
                status_code,
                reason: reason.into(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<SipMethod> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status_code, .. } => Some(*status_code),
            StartLine::Request { .. } => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn all_headers(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self = self.with_header("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, SipMethod)> {
        let raw = self.header("CSeq")?;
        let (num, method) = raw.trim().split_once(' ')?;
        Some((num.parse().ok()?, SipMethod::parse(method)?))
    }

    pub fn via(&self) -> Option<&str> {
        self.header("Via")
    }

    /// Render into the bytes that go on the wire (`CRLF`-terminated
    /// headers, blank line, body).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.start_line {
            StartLine::Request {
                method,
                request_uri,
            } => {
                out.extend_from_slice(format!("{} {} SIP/2.0\r\n", method, request_uri).as_bytes());
            }
            StartLine::Response {
                status_code,
                reason,
            } => {
                out.extend_from_slice(format!("SIP/2.0 {} {}\r\n", status_code, reason).as_bytes());
            }
        }
        for h in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", h.name, h.value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
