//! HTTP/1.x message model and parsing for the sifter proxy.
//!
//! Everything in this crate is a pure bytes-in/values-out transform: line
//! and head parsing, body-encoding derivation, target resolution, and the
//! upstream head rewrite. The I/O that feeds these functions lives in
//! `sifter-proxy`.

mod body;
mod error;
mod head;
mod rewrite;
mod target;

pub use body::{parse_chunk_size_line, BodyEncoding};
pub use error::ParseError;
pub use head::{HeaderBlock, RequestLine, StatusLine};
pub use rewrite::build_upstream_request_head;
pub use target::{parse_connect_authority, resolve_target, Target};
