//! One accepted client connection, driven end to end.
//!
//! The controller reads the request head and any body, runs the policy
//! checks, then either tunnels (CONNECT) or forwards the request upstream
//! and relays back the fully-buffered, policy-cleared response. Nothing is
//! written to the client until the decision for the whole message is made,
//! so a blocked response never leaks partial bytes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use sifter_core::ProxyEngine;
use sifter_http::{
    build_upstream_request_head, parse_connect_authority, resolve_target, BodyEncoding,
    HeaderBlock, RequestLine, StatusLine,
};
use sifter_observe::{Event, EventSink, EventType, FlowContext};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::body::{read_message_body, BodyReadOutcome};
use crate::framed::{with_io_timeout, FramedStream};
use crate::tunnel::relay_until_closed;
use crate::upstream::connect_upstream;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Runs a session to completion. Transport failures end the session quietly
/// as far as the client is concerned; they surface only as a failure event.
pub(crate) async fn run_session<S>(
    engine: Arc<ProxyEngine<S>>,
    stream: TcpStream,
    client_addr: SocketAddr,
) where
    S: EventSink + 'static,
{
    let context = FlowContext::for_flow(engine.allocate_flow_id(), client_addr.to_string());
    if let Err(error) = drive_session(&engine, context.clone(), stream).await {
        engine.emit(
            Event::new(EventType::SessionFailed, context)
                .with_attribute("error", error.to_string()),
        );
        tracing::debug!(%error, client = %client_addr, "session aborted");
    }
}

async fn drive_session<S: EventSink>(
    engine: &ProxyEngine<S>,
    context: FlowContext,
    stream: TcpStream,
) -> io::Result<()> {
    let max_line_bytes = engine.config.max_line_bytes;
    let max_header_bytes = engine.config.max_header_bytes;
    let mut client = FramedStream::new(stream, engine.config.receive_timeout());

    // Request line.
    let request_line_raw = match client.read_line(max_line_bytes).await {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(()),
        Err(error) if error.kind() == io::ErrorKind::InvalidData => {
            write_error_page(&mut client, 400, "Bad Request", "Malformed request line.").await;
            return Ok(());
        }
        Err(error) => return Err(error),
    };
    engine.emit(
        Event::new(EventType::RequestReceived, context.clone())
            .with_attribute("line", request_line_raw.clone()),
    );

    // Header block.
    let mut headers = HeaderBlock::new(max_header_bytes);
    loop {
        match client.read_line(max_line_bytes).await {
            Ok(Some(line)) if line.is_empty() => break,
            Ok(Some(line)) => {
                if headers.push_line(&line).is_err() {
                    write_error_page(
                        &mut client,
                        400,
                        "Bad Request",
                        "Request header block too large.",
                    )
                    .await;
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                write_error_page(&mut client, 400, "Bad Request", "Malformed request headers.")
                    .await;
                return Ok(());
            }
            Err(error) => return Err(error),
        }
    }

    // Request body, if the headers announce one. The read scans as it goes,
    // so a forbidden body is refused without waiting for the combined check.
    let request_body = match BodyEncoding::for_request(&headers) {
        Some(encoding) => {
            match read_message_body(
                &mut client,
                encoding,
                engine.policy(),
                max_line_bytes,
                max_header_bytes,
            )
            .await
            {
                Ok(BodyReadOutcome::Complete { raw, decoded }) => Some((raw, decoded)),
                Ok(BodyReadOutcome::Blocked { word }) => {
                    engine.emit(
                        Event::new(EventType::RequestBlockedWord, context.clone())
                            .with_attribute("word", word),
                    );
                    write_error_page(
                        &mut client,
                        403,
                        "Forbidden",
                        "Your request contains forbidden words and was blocked by the proxy.",
                    )
                    .await;
                    return Ok(());
                }
                Err(_) => return Ok(()),
            }
        }
        None => None,
    };

    // Combined scan over everything the client sent, before the target is
    // even parsed.
    let decoded_body = request_body
        .as_ref()
        .map(|(_, decoded)| decoded.as_slice())
        .unwrap_or(&[]);
    let combined = combined_request_text(&request_line_raw, &headers, decoded_body);
    if engine.scan_request_text(&context, &combined).is_some() {
        write_error_page(
            &mut client,
            403,
            "Forbidden",
            "Your request contains forbidden words and was blocked by the proxy.",
        )
        .await;
        return Ok(());
    }

    let request_line = match RequestLine::parse(&request_line_raw) {
        Ok(line) => line,
        Err(_) => {
            write_error_page(&mut client, 400, "Bad Request", "Malformed request line.").await;
            return Ok(());
        }
    };

    if request_line.is_connect() {
        handle_connect(engine, context, client, &request_line).await
    } else {
        let request_body_raw = request_body.map(|(raw, _)| raw);
        forward_request(engine, context, client, &request_line, &headers, request_body_raw).await
    }
}

async fn handle_connect<S: EventSink>(
    engine: &ProxyEngine<S>,
    context: FlowContext,
    mut client: FramedStream<TcpStream>,
    request_line: &RequestLine,
) -> io::Result<()> {
    let (host, port) = match parse_connect_authority(&request_line.target) {
        Ok(authority) => authority,
        Err(_) => {
            write_error_page(&mut client, 400, "Bad Request", "Malformed request line.").await;
            return Ok(());
        }
    };
    let context = context.with_target(host.clone(), port);

    if engine.check_connect_host(&context).is_some() {
        write_error_page(
            &mut client,
            403,
            "Forbidden",
            "CONNECT to this site is blocked by the proxy.",
        )
        .await;
        return Ok(());
    }

    let (mut upstream, upstream_addr) =
        match connect_upstream(&host, port, engine.config.connect_timeout()).await {
            Ok(connected) => connected,
            Err(error) => {
                engine.emit(
                    Event::new(EventType::UpstreamConnectFailed, context.clone())
                        .with_attribute("error", error.to_string()),
                );
                write_error_page(
                    &mut client,
                    502,
                    "Bad Gateway",
                    "Failed to connect to the upstream server.",
                )
                .await;
                return Ok(());
            }
        };

    client.write_all(CONNECT_ESTABLISHED).await?;
    engine.emit(
        Event::new(EventType::TunnelEstablished, context.clone())
            .with_attribute("ip", upstream_addr.ip().to_string()),
    );

    // Bytes the client pipelined behind the CONNECT head, typically an eager
    // TLS ClientHello, must reach the upstream before the relay starts.
    let (mut client_stream, leftover) = client.into_parts();
    if !leftover.is_empty() {
        with_io_timeout(engine.config.receive_timeout(), upstream.write_all(&leftover)).await?;
    }

    let (bytes_up, bytes_down) = relay_until_closed(
        &mut client_stream,
        &mut upstream,
        engine.config.receive_timeout(),
    )
    .await;
    engine.emit(
        Event::new(EventType::TunnelClosed, context)
            .with_attribute("bytes_up", bytes_up.to_string())
            .with_attribute("bytes_down", bytes_down.to_string()),
    );
    Ok(())
}

async fn forward_request<S: EventSink>(
    engine: &ProxyEngine<S>,
    context: FlowContext,
    mut client: FramedStream<TcpStream>,
    request_line: &RequestLine,
    headers: &HeaderBlock,
    request_body_raw: Option<Vec<u8>>,
) -> io::Result<()> {
    let target = match resolve_target(request_line, headers) {
        Ok(target) => target,
        Err(_) => {
            write_error_page(
                &mut client,
                400,
                "Bad Request",
                "Unable to determine request host.",
            )
            .await;
            return Ok(());
        }
    };
    let context = context.with_target(target.host.clone(), target.port);

    if engine.check_forward_host(&context).is_some() {
        write_error_page(
            &mut client,
            403,
            "Forbidden",
            "Access to this host is blocked by the proxy.",
        )
        .await;
        return Ok(());
    }

    let (upstream_stream, upstream_addr) =
        match connect_upstream(&target.host, target.port, engine.config.connect_timeout()).await {
            Ok(connected) => connected,
            Err(error) => {
                engine.emit(
                    Event::new(EventType::UpstreamConnectFailed, context.clone())
                        .with_attribute("error", error.to_string()),
                );
                write_error_page(
                    &mut client,
                    502,
                    "Bad Gateway",
                    "Failed to connect to the upstream server.",
                )
                .await;
                return Ok(());
            }
        };
    engine.emit(
        Event::new(EventType::UpstreamConnected, context.clone())
            .with_attribute("method", request_line.method.clone())
            .with_attribute("path", target.path.clone())
            .with_attribute("ip", upstream_addr.ip().to_string()),
    );

    let mut upstream = FramedStream::new(upstream_stream, engine.config.receive_timeout());
    let head = build_upstream_request_head(request_line, headers, &target);
    upstream.write_all(&head).await?;
    if let Some(body) = &request_body_raw {
        if !body.is_empty() {
            upstream.write_all(body).await?;
        }
    }

    // Upstream status line and headers, re-emitted to the client verbatim
    // once the whole response has cleared the policy.
    let status_line_raw = match upstream.read_line(engine.config.max_line_bytes).await {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(()),
        Err(error) if error.kind() == io::ErrorKind::InvalidData => {
            write_error_page(
                &mut client,
                400,
                "Bad Request",
                "Malformed response from upstream server.",
            )
            .await;
            return Ok(());
        }
        Err(error) => return Err(error),
    };
    if StatusLine::parse(&status_line_raw).is_err() {
        write_error_page(
            &mut client,
            400,
            "Bad Request",
            "Malformed response from upstream server.",
        )
        .await;
        return Ok(());
    }

    let mut response_headers = HeaderBlock::new(engine.config.max_header_bytes);
    loop {
        match upstream.read_line(engine.config.max_line_bytes).await {
            Ok(Some(line)) if line.is_empty() => break,
            Ok(Some(line)) => {
                if response_headers.push_line(&line).is_err() {
                    write_error_page(
                        &mut client,
                        400,
                        "Bad Request",
                        "Malformed response from upstream server.",
                    )
                    .await;
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                write_error_page(
                    &mut client,
                    400,
                    "Bad Request",
                    "Malformed response from upstream server.",
                )
                .await;
                return Ok(());
            }
            Err(error) => return Err(error),
        }
    }

    let encoding = BodyEncoding::from_headers(&response_headers);
    let outcome = read_message_body(
        &mut upstream,
        encoding,
        engine.policy(),
        engine.config.max_line_bytes,
        engine.config.max_header_bytes,
    )
    .await?;

    let raw_body = match outcome {
        BodyReadOutcome::Blocked { word } => {
            engine.report_response_blocked(&context, &word);
            write_error_page(
                &mut client,
                503,
                "Service Unavailable",
                "The server response contains forbidden content and was blocked by the proxy.",
            )
            .await;
            return Ok(());
        }
        BodyReadOutcome::Complete { raw, .. } => raw,
    };

    let mut response_head = Vec::with_capacity(status_line_raw.len() + 2);
    response_head.extend_from_slice(status_line_raw.as_bytes());
    response_head.extend_from_slice(b"\r\n");
    response_headers.append_to(&mut response_head);
    client.write_all(&response_head).await?;
    if !raw_body.is_empty() {
        client.write_all(&raw_body).await?;
    }

    engine.emit(
        Event::new(EventType::RequestCompleted, context).with_attribute("path", target.path),
    );
    Ok(())
}

fn combined_request_text(request_line: &str, headers: &HeaderBlock, decoded_body: &[u8]) -> String {
    let mut text = String::new();
    text.push_str(request_line);
    text.push_str("\r\n");
    for line in headers.lines() {
        text.push_str(line);
        text.push_str("\r\n");
    }
    text.push_str("\r\n");
    text.push_str(&String::from_utf8_lossy(decoded_body));
    text
}

/// Fixed HTML error page, sent as a complete response with the connection
/// closing afterwards. Failures here are ignored; the session is ending
/// either way.
async fn write_error_page(
    client: &mut FramedStream<TcpStream>,
    code: u16,
    reason: &str,
    detail: &str,
) {
    let page = render_error_page(code, reason, detail);
    let _ = client.write_all(&page).await;
}

pub(crate) fn render_error_page(code: u16, reason: &str, detail: &str) -> Vec<u8> {
    let body = format!(
        "<html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1><p>{detail}</p></body></html>"
    );
    let mut page = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    page.extend_from_slice(body.as_bytes());
    page
}
