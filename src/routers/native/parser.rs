//! HTTP/1.x request head parser and response encoder.

use bytes::{BufMut, BytesMut};

use crate::service::Reply;

/// Largest request head (request line plus headers) accepted.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Supported protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Parsed request line and the headers the router cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: Version,
    /// Declared body length; zero when absent.
    pub content_length: usize,
    /// A `Transfer-Encoding` header was present.
    pub chunked: bool,
    pub keep_alive: bool,
    /// Bytes consumed by the head, including the blank line.
    pub head_len: usize,
}

/// Parse errors. Every one of them ends the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD SP TARGET SP VERSION`
    InvalidRequestLine,
    /// Version other than HTTP/1.0 or HTTP/1.1
    UnsupportedVersion(String),
    /// Header line without a colon, or with an invalid name
    InvalidHeader,
    /// Unparseable or conflicting Content-Length
    InvalidContentLength,
    /// Head exceeds `MAX_HEAD_SIZE`
    HeadTooLarge,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidRequestLine => write!(f, "invalid request line"),
            ParseError::UnsupportedVersion(v) => write!(f, "unsupported version '{v}'"),
            ParseError::InvalidHeader => write!(f, "invalid header line"),
            ParseError::InvalidContentLength => write!(f, "invalid content-length"),
            ParseError::HeadTooLarge => write!(f, "request head too large"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// A full request head is buffered.
    Complete(RequestHead),
    /// Need more data for the head.
    Incomplete,
    Error(ParseError),
}

/// Parse a request head from the start of `input`.
///
/// The body, if any, starts at `head_len` and is left to the caller.
pub fn parse(input: &[u8]) -> ParseResult {
    let head_end = match find_head_end(input) {
        Some(pos) => pos,
        None if input.len() > MAX_HEAD_SIZE => {
            return ParseResult::Error(ParseError::HeadTooLarge);
        }
        None => return ParseResult::Incomplete,
    };
    if head_end > MAX_HEAD_SIZE {
        return ParseResult::Error(ParseError::HeadTooLarge);
    }

    match parse_head(&input[..head_end]) {
        Ok(mut head) => {
            head.head_len = head_end + 4;
            ParseResult::Complete(head)
        }
        Err(e) => ParseResult::Error(e),
    }
}

fn parse_head(head: &[u8]) -> Result<RequestHead, ParseError> {
    let head = std::str::from_utf8(head).map_err(|_| ParseError::InvalidRequestLine)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
    let mut parts = request_line.split(' ');
    let (method, target, version) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && t.starts_with('/') => (m, t, v),
            _ => return Err(ParseError::InvalidRequestLine),
        };
    if !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ParseError::InvalidRequestLine);
    }
    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        other => return Err(ParseError::UnsupportedVersion(other.to_string())),
    };

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    let mut close = false;
    let mut keep_alive_token = false;

    for line in lines {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let invalid_name_byte = |b: u8| b.is_ascii_whitespace() || b.is_ascii_control();
        if name.is_empty() || name.bytes().any(invalid_name_byte) {
            return Err(ParseError::InvalidHeader);
        }
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            let len: usize = value
                .parse()
                .map_err(|_| ParseError::InvalidContentLength)?;
            if content_length.is_some_and(|prev| prev != len) {
                return Err(ParseError::InvalidContentLength);
            }
            content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = true;
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    keep_alive_token = true;
                }
            }
        }
    }

    let keep_alive = match version {
        Version::Http11 => !close,
        Version::Http10 => keep_alive_token && !close,
    };

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version,
        content_length: content_length.unwrap_or(0),
        chunked,
        keep_alive,
        head_len: 0,
    })
}

/// Find `\r\n\r\n`, returning the position of the first `\r`.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// How a reply is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing<'a> {
    /// `Allow` header value, for 405 replies.
    pub allow: Option<&'a str>,
    pub keep_alive: bool,
    /// `false` for replies to `HEAD`: headers describe the body, which is
    /// not sent.
    pub send_body: bool,
}

/// Encode a reply as an HTTP/1.1 response into `output`.
pub fn encode_response(output: &mut BytesMut, reply: &Reply, framing: Framing<'_>) {
    output.reserve(128 + reply.body_len());
    output.put_slice(b"HTTP/1.1 ");
    output.put_slice(reply.status.as_str().as_bytes());
    output.put_u8(b' ');
    let reason = reply.status.canonical_reason().unwrap_or("Unknown");
    output.put_slice(reason.as_bytes());
    output.put_slice(b"\r\n");

    if let Some(content_type) = reply.content_type() {
        put_header(output, "Content-Type", content_type);
    }
    put_header(output, "Content-Length", &reply.body_len().to_string());
    if let Some(allow) = framing.allow {
        put_header(output, "Allow", allow);
    }
    let connection = if framing.keep_alive { "keep-alive" } else { "close" };
    put_header(output, "Connection", connection);
    output.put_slice(b"\r\n");

    if let (Some(body), true) = (&reply.body, framing.send_body) {
        output.put_slice(body);
    }
}

fn put_header(output: &mut BytesMut, name: &str, value: &str) {
    output.put_slice(name.as_bytes());
    output.put_slice(b": ");
    output.put_slice(value.as_bytes());
    output.put_slice(b"\r\n");
}
