//! Upstream name resolution and connection.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::Instant;

/// Resolves `host` and tries each candidate address in resolver order until
/// one connects. The whole operation, resolution included, runs under a
/// single deadline; a candidate that is still connecting when the deadline
/// passes fails the attempt with `TimedOut`.
///
/// `host` must be an unbracketed hostname or IP literal.
pub async fn connect_upstream(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> io::Result<(TcpStream, SocketAddr)> {
    let deadline = Instant::now() + connect_timeout;

    let addrs = resolve_under_deadline(host, port, deadline).await?;
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host} resolved to no addresses"),
        ));
    }

    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(connect_deadline_error(host, port));
        }
        match tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok((stream, addr)),
            Ok(Err(error)) => last_error = Some(error),
            Err(_) => return Err(connect_deadline_error(host, port)),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "all upstream connect attempts failed",
        )
    }))
}

async fn resolve_under_deadline(
    host: &str,
    port: u16,
    deadline: Instant,
) -> io::Result<Vec<SocketAddr>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(connect_deadline_error(host, port));
    }
    match tokio::time::timeout(remaining, lookup_host((host, port))).await {
        Ok(resolved) => Ok(resolved?.collect()),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("resolving {host} timed out"),
        )),
    }
}

fn connect_deadline_error(host: &str, port: u16) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("connecting to {host}:{port} timed out"),
    )
}
