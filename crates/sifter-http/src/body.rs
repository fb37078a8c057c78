use crate::error::ParseError;
use crate::head::HeaderBlock;

/// How a message body is delimited on the wire.
///
/// Derived from headers alone: a `Transfer-Encoding` whose value contains
/// `chunked` wins over everything, then a parseable `Content-Length`, and
/// otherwise the body runs until the peer closes. An unparseable
/// `Content-Length` falls through to `UntilClose` rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Chunked,
    ContentLength(u64),
    UntilClose,
}

impl BodyEncoding {
    pub fn from_headers(headers: &HeaderBlock) -> Self {
        if let Some(value) = headers.get("transfer-encoding") {
            if value.to_ascii_lowercase().contains("chunked") {
                return Self::Chunked;
            }
        }
        if let Some(value) = headers.get("content-length") {
            if let Ok(length) = value.parse::<u64>() {
                return Self::ContentLength(length);
            }
        }
        Self::UntilClose
    }

    /// Request-side framing: a client cannot close-delimit a body and still
    /// read a response, so `UntilClose` degenerates to no body at all.
    pub fn for_request(headers: &HeaderBlock) -> Option<Self> {
        match Self::from_headers(headers) {
            Self::UntilClose => None,
            encoding => Some(encoding),
        }
    }
}

/// Parses a chunk-size line: hex digits before an optional `;`-introduced
/// extension (ignored), surrounding whitespace tolerated.
pub fn parse_chunk_size_line(line: &str) -> Result<u64, ParseError> {
    let size_text = line.split(';').next().unwrap_or("").trim();
    if size_text.is_empty() {
        return Err(ParseError::MalformedChunkSize(line.to_string()));
    }
    u64::from_str_radix(size_text, 16)
        .map_err(|_| ParseError::MalformedChunkSize(line.to_string()))
}
