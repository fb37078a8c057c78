use thiserror::Error;

/// Parse-level failures. Every variant maps to a `400 Bad Request` at the
/// session layer except `MalformedChunkSize`, which surfaces mid-body and
/// aborts the transfer instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),
    #[error("header block exceeded {0} bytes")]
    HeaderBlockTooLarge(usize),
    #[error("request target was not a resolvable URI: {0:?}")]
    InvalidTarget(String),
    #[error("origin-form request had no usable Host header")]
    MissingHost,
    #[error("malformed CONNECT target: {0:?}")]
    MalformedConnectTarget(String),
    #[error("malformed chunk size line: {0:?}")]
    MalformedChunkSize(String),
}
