//! Bidirectional byte relay for established CONNECT tunnels.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TUNNEL_CHUNK_BYTES: usize = 64 * 1024;

/// Relays raw bytes between the client and the upstream until both
/// directions have closed.
///
/// A zero-length read or a failed write on one direction half-closes the
/// peer's write side and leaves the opposite direction running; the relay
/// returns only once neither direction can carry more bytes, or after an
/// idle window with no traffic either way. Returns the byte totals as
/// `(client_to_upstream, upstream_to_client)`.
pub async fn relay_until_closed<C, U>(
    client: &mut C,
    upstream: &mut U,
    idle_timeout: Duration,
) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut from_client = [0_u8; TUNNEL_CHUNK_BYTES];
    let mut from_upstream = [0_u8; TUNNEL_CHUNK_BYTES];
    let mut client_to_upstream = 0_u64;
    let mut upstream_to_client = 0_u64;
    let mut client_done = false;
    let mut upstream_done = false;

    loop {
        if client_done && upstream_done {
            return (client_to_upstream, upstream_to_client);
        }

        tokio::select! {
            read = client.read(&mut from_client), if !client_done => {
                match read {
                    Ok(0) | Err(_) => {
                        client_done = true;
                        let _ = tokio::time::timeout(idle_timeout, upstream.shutdown()).await;
                    }
                    Ok(count) => {
                        match tokio::time::timeout(
                            idle_timeout,
                            upstream.write_all(&from_client[..count]),
                        )
                        .await
                        {
                            Ok(Ok(())) => client_to_upstream += count as u64,
                            Ok(Err(_)) | Err(_) => client_done = true,
                        }
                    }
                }
            }
            read = upstream.read(&mut from_upstream), if !upstream_done => {
                match read {
                    Ok(0) | Err(_) => {
                        upstream_done = true;
                        let _ = tokio::time::timeout(idle_timeout, client.shutdown()).await;
                    }
                    Ok(count) => {
                        match tokio::time::timeout(
                            idle_timeout,
                            client.write_all(&from_upstream[..count]),
                        )
                        .await
                        {
                            Ok(Ok(())) => upstream_to_client += count as u64,
                            Ok(Err(_)) | Err(_) => upstream_done = true,
                        }
                    }
                }
            }
            _ = tokio::time::sleep(idle_timeout) => {
                return (client_to_upstream, upstream_to_client);
            }
        }
    }
}
