//! Message body reading with live content inspection.
//!
//! Bodies are fully buffered before anything is forwarded, in two parallel
//! forms: `raw` is what goes back on the wire (chunk framing included, with
//! line endings normalized to CRLF) and `decoded` is the payload alone, the
//! text the policy scan runs against. The scan runs after every piece read,
//! so a forbidden body aborts the transfer without draining the rest.

use std::io;

use sifter_http::{parse_chunk_size_line, BodyEncoding};
use sifter_policy::Policy;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::framed::FramedStream;

const BODY_PIECE_BYTES: usize = 64 * 1024;

/// How a body read ended: either the whole body is in hand, or the scan
/// matched a forbidden word and the remainder was left unread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyReadOutcome {
    Complete { raw: Vec<u8>, decoded: Vec<u8> },
    Blocked { word: String },
}

pub async fn read_message_body<S>(
    stream: &mut FramedStream<S>,
    encoding: BodyEncoding,
    policy: &Policy,
    max_line_bytes: usize,
    max_trailer_bytes: usize,
) -> io::Result<BodyReadOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match encoding {
        BodyEncoding::Chunked => {
            read_chunked_body(stream, policy, max_line_bytes, max_trailer_bytes).await
        }
        BodyEncoding::ContentLength(len) => read_sized_body(stream, policy, len).await,
        BodyEncoding::UntilClose => read_until_close_body(stream, policy).await,
    }
}

async fn read_chunked_body<S>(
    stream: &mut FramedStream<S>,
    policy: &Policy,
    max_line_bytes: usize,
    max_trailer_bytes: usize,
) -> io::Result<BodyReadOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    let mut decoded = Vec::new();

    loop {
        let size_line = stream
            .read_line(max_line_bytes)
            .await?
            .ok_or_else(|| closed_mid_body("chunk size line"))?;
        let chunk_size = parse_chunk_size_line(&size_line)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;
        raw.extend_from_slice(size_line.as_bytes());
        raw.extend_from_slice(b"\r\n");

        if chunk_size == 0 {
            read_trailers(stream, &mut raw, max_line_bytes, max_trailer_bytes).await?;
            return Ok(BodyReadOutcome::Complete { raw, decoded });
        }

        let mut remaining = chunk_size;
        while remaining > 0 {
            let piece_len = remaining.min(BODY_PIECE_BYTES as u64) as usize;
            let piece = stream.read_exact(piece_len).await?;
            raw.extend_from_slice(&piece);
            decoded.extend_from_slice(&piece);
            remaining -= piece.len() as u64;
            if let Some(word) = scan_decoded(policy, &decoded) {
                return Ok(BodyReadOutcome::Blocked { word });
            }
        }

        let terminator = stream.read_exact(2).await?;
        if terminator != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "chunk data not terminated by CRLF",
            ));
        }
        raw.extend_from_slice(b"\r\n");
    }
}

async fn read_trailers<S>(
    stream: &mut FramedStream<S>,
    raw: &mut Vec<u8>,
    max_line_bytes: usize,
    max_trailer_bytes: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut trailer_bytes = 0usize;
    loop {
        let line = stream
            .read_line(max_line_bytes)
            .await?
            .ok_or_else(|| closed_mid_body("chunk trailers"))?;
        if line.is_empty() {
            raw.extend_from_slice(b"\r\n");
            return Ok(());
        }
        trailer_bytes += line.len() + 2;
        if trailer_bytes > max_trailer_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("chunk trailers exceed {max_trailer_bytes} bytes"),
            ));
        }
        raw.extend_from_slice(line.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
}

async fn read_sized_body<S>(
    stream: &mut FramedStream<S>,
    policy: &Policy,
    len: u64,
) -> io::Result<BodyReadOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    let mut decoded = Vec::new();

    let mut remaining = len;
    while remaining > 0 {
        let piece_len = remaining.min(BODY_PIECE_BYTES as u64) as usize;
        let piece = stream.read_exact(piece_len).await?;
        raw.extend_from_slice(&piece);
        decoded.extend_from_slice(&piece);
        remaining -= piece.len() as u64;
        if let Some(word) = scan_decoded(policy, &decoded) {
            return Ok(BodyReadOutcome::Blocked { word });
        }
    }
    Ok(BodyReadOutcome::Complete { raw, decoded })
}

async fn read_until_close_body<S>(
    stream: &mut FramedStream<S>,
    policy: &Policy,
) -> io::Result<BodyReadOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    let mut decoded = Vec::new();

    while let Some(piece) = stream.read_available().await? {
        raw.extend_from_slice(&piece);
        decoded.extend_from_slice(&piece);
        if let Some(word) = scan_decoded(policy, &decoded) {
            return Ok(BodyReadOutcome::Blocked { word });
        }
    }
    Ok(BodyReadOutcome::Complete { raw, decoded })
}

/// Rescans the accumulated payload so far. Scanning the whole buffer each
/// time keeps matches that straddle a piece boundary detectable.
fn scan_decoded(policy: &Policy, decoded: &[u8]) -> Option<String> {
    if policy.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(decoded);
    policy.find_forbidden_word(&text).map(|word| word.to_string())
}

fn closed_mid_body(stage: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("connection closed while reading {stage}"),
    )
}
