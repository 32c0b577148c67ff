//! `nom`-based parsing of the SIP start line and header block. Bodies are
//! handed back as raw bytes for `sdp::parse` (or the caller) to interpret.

use nom::bytes::complete::{tag, take_till, take_while1};
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{map, map_res, opt};
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use crate::message::{Header, SipMessage, SipMethod, StartLine};

fn is_token_char(c: char) -> bool {
    !c.is_whitespace()
}

fn request_line(input: &str) -> IResult<&str, StartLine> {
    map(
        tuple((
            take_while1(|c: char| c.is_ascii_uppercase()),
            space1,
            take_till(|c: char| c.is_whitespace()),
            space1,
            tag("SIP/2.0"),
        )),
        |(method, _, uri, _, _)| StartLine::Request {
            method: SipMethod::parse(method).unwrap_or(SipMethod::Invite),
            request_uri: uri.to_string(),
        },
    )(input)
}

fn status_line(input: &str) -> IResult<&str, StartLine> {
    map(
        tuple((
            tag("SIP/2.0"),
            space1,
            map_res(digit1, str::parse::<u16>),
            space1,
            take_till(|c| c == '\r' || c == '\n'),
        )),
        |(_, _, code, _, reason)| StartLine::Response {
            status_code: code,
            reason: reason.to_string(),
        },
    )(input)
}

fn start_line(input: &str) -> IResult<&str, StartLine> {
    nom::branch::alt((status_line, request_line))(input)
}

fn header_line(input: &str) -> IResult<&str, Header> {
    map(
        tuple((
            take_while1(|c: char| is_token_char(c) && c != ':'),
            char(':'),
            space0,
            take_till(|c| c == '\r' || c == '\n'),
        )),
        |(name, _, _, value): (&str, char, &str, &str)| Header {
            name: name.to_string(),
            value: value.to_string(),
        },
    )(input)
}

fn crlf_or_lf(input: &str) -> IResult<&str, &str> {
    nom::branch::alt((tag("\r\n"), tag("\n")))(input)
}

/// Parse a complete SIP message (start line, headers, blank line). `body`
/// is whatever follows; the caller truncates it using `Content-Length` if
/// it needs to split multiple messages out of a stream.
pub fn parse_message(input: &str) -> IResult<&str, SipMessage> {
    let (input, start) = terminated(start_line, crlf_or_lf)(input)?;
    let mut headers = Vec::new();
    let mut rest = input;
    loop {
        if rest.starts_with("\r\n") {
            rest = &rest[2..];
            break;
        }
        if rest.starts_with('\n') {
            rest = &rest[1..];
            break;
        }
        if rest.is_empty() {
            break;
        }
        let (next, header) = terminated(header_line, crlf_or_lf)(rest)?;
        headers.push(header);
        rest = next;
    }
    Ok((
        "",
        SipMessage {
            start_line: start,
            headers,
            body: bytes::Bytes::copy_from_slice(rest.as_bytes()),
        },
    ))
}

/// Parse the `name <sip:user@host:port>;tag=x` style value shared by
/// `From`/`To`/`Contact`, returning the display name (if any) and the raw
/// URI substring.
pub fn parse_name_addr(value: &str) -> IResult<&str, (Option<&str>, &str)> {
    let value = value.trim();
    if let Some(start) = value.find('<') {
        let display = if start > 0 {
            Some(value[..start].trim().trim_matches('"'))
        } else {
            None
        };
        let end = value[start..].find('>').map(|e| start + e);
        if let Some(end) = end {
            return Ok(("", (display, &value[start + 1..end])));
        }
    }
    // bare URI, optionally followed by ;params
    let uri_end = value.find(';').unwrap_or(value.len());
    Ok(("", (None, value[..uri_end].trim())))
}

pub fn preceded_tag<'a>(t: &'static str, input: &'a str) -> IResult<&'a str, &'a str> {
    preceded(opt(space0), tag(t))(input).map(|(rest, _)| (rest, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_request() {
        let raw = "INVITE sip:1001-0203@192.0.2.1 SIP/2.0\r\nVia: SIP/2.0/UDP 192.0.2.2\r\nCall-ID: abc123\r\nCSeq: 1 INVITE\r\n\r\nbody-bytes";
        let (_, msg) = parse_message(raw).unwrap();
        assert_eq!(msg.method(), Some(SipMethod::Invite));
        assert_eq!(msg.call_id(), Some("abc123"));
        assert_eq!(msg.cseq(), Some((1, SipMethod::Invite)));
        assert_eq!(&msg.body[..], b"body-bytes");
    }

    #[test]
    fn parses_simple_response() {
        let raw = "SIP/2.0 200 OK\r\nCall-ID: abc123\r\n\r\n";
        let (_, msg) = parse_message(raw).unwrap();
        assert_eq!(msg.status_code(), Some(200));
    }

    #[test]
    fn parses_name_addr_with_display_name_and_tag() {
        let (_, (display, uri)) =
            parse_name_addr("\"Front Door\" <sip:1001-0203@192.0.2.1>;tag=xyz").unwrap();
        assert_eq!(display, Some("Front Door"));
        assert_eq!(uri, "sip:1001-0203@192.0.2.1");
    }

    #[test]
    fn parses_bare_uri_name_addr() {
        let (_, (display, uri)) = parse_name_addr("sip:1001-0203@192.0.2.1;tag=xyz").unwrap();
        assert_eq!(display, None);
        assert_eq!(uri, "sip:1001-0203@192.0.2.1");
    }
}
