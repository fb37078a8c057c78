use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sifter_core::{ProxyConfig, ProxyEngine};
use sifter_observe::{EventType, VecEventSink};
use sifter_policy::Policy;
use sifter_proxy::ProxyServer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_proxy(
    policy: Policy,
) -> (
    SocketAddr,
    tokio::task::JoinHandle<std::io::Result<()>>,
    VecEventSink,
) {
    let mut config = ProxyConfig::default();
    config.listen_addr = "127.0.0.1".to_string();
    config.listen_port = 0;
    let sink = VecEventSink::default();
    let engine = ProxyEngine::new(config, Arc::new(policy), sink.clone()).expect("build engine");
    let server = ProxyServer::new(engine);
    let listener = server.bind().await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy local addr");
    let handle = tokio::spawn(server.run_with_listener(listener));
    (addr, handle, sink)
}

/// Serves `response` to every connection after reading the request head,
/// counting accepted connections.
async fn start_upstream(response: Vec<u8>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let response = response.clone();
            tokio::spawn(async move {
                let _ = read_http_head(&mut stream).await;
                stream
                    .write_all(&response)
                    .await
                    .expect("write upstream response");
                stream.shutdown().await.expect("shutdown upstream");
            });
        }
    });
    (addr, accepts)
}

async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buffer = [0_u8; 1024];
    while !data.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buffer).await.expect("read HTTP head");
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read]);
    }
    data
}

async fn read_to_end_allow_reset<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0_u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => out.extend_from_slice(&buf[..read]),
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(error) if error.kind() == std::io::ErrorKind::ConnectionReset => break,
            Err(error) => panic!("read response: {error}"),
        }
    }
    out
}

async fn send_request(proxy_addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy_addr).await.expect("connect proxy");
    client.write_all(request).await.expect("write request");
    client.flush().await.expect("flush request");
    read_to_end_allow_reset(&mut client).await
}

fn parse_content_length(head_bytes: &[u8]) -> usize {
    let text = String::from_utf8_lossy(head_bytes);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse::<usize>().expect("valid content-length");
            }
        }
    }
    0
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forwards_clean_response_byte_identical() {
    let upstream_response =
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nworld".to_vec();
    let (upstream_addr, accepts) = start_upstream(upstream_response.clone()).await;
    let (proxy_addr, proxy_task, sink) = start_proxy(Policy::default()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/hello HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
        upstream_addr.port(),
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    assert_eq!(response, upstream_response);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();

    let kinds = sink.kinds();
    assert!(kinds.contains(&EventType::RequestReceived));
    assert!(kinds.contains(&EventType::UpstreamConnected));
    assert!(kinds.contains(&EventType::RequestCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rewrites_request_head_to_origin_form() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = listener.local_addr().expect("upstream addr");
    let port = upstream_addr.port();
    let upstream_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept upstream");
        let head = read_http_head(&mut stream).await;
        let expected = format!(
            "GET /plain HTTP/1.1\r\n\
             Connection: close\r\n\
             Accept: */*\r\n\
             Host: 127.0.0.1:{port}\r\n\r\n"
        );
        assert_eq!(String::from_utf8_lossy(&head), expected);

        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
        stream.write_all(response).await.expect("write response");
        stream.shutdown().await.expect("shutdown upstream");
    });

    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;
    let request = format!(
        "GET http://127.0.0.1:{port}/plain HTTP/1.1\r\n\
         Proxy-Connection: keep-alive\r\n\
         Connection: keep-alive\r\n\
         Accept: */*\r\n\r\n"
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 200 OK"), "{response_text}");

    upstream_task.await.expect("upstream task");
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_word_is_blocked_before_any_upstream_contact() {
    let (upstream_addr, accepts) = start_upstream(b"unreached".to_vec()).await;
    let policy = Policy::from_lists(vec!["torrent"], Vec::<&str>::new());
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    let request = format!(
        "GET http://127.0.0.1:{}/search?q=ToRRent HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 403 Forbidden"), "{response_text}");
    assert!(
        response_text.contains("Your request contains forbidden words and was blocked by the proxy."),
        "{response_text}"
    );
    assert_eq!(accepts.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::RequestBlockedWord));
    assert!(!sink.kinds().contains(&EventType::UpstreamConnected));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forbidden_host_is_blocked_without_connecting() {
    let (upstream_addr, accepts) = start_upstream(b"unreached".to_vec()).await;
    let policy = Policy::from_lists(Vec::<&str>::new(), vec!["127.0.0.1"]);
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    let request = format!(
        "GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 403 Forbidden"), "{response_text}");
    assert!(
        response_text.contains("Access to this host is blocked by the proxy."),
        "{response_text}"
    );
    assert_eq!(accepts.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::RequestBlockedHost));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn post_with_clean_body_is_forwarded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = listener.local_addr().expect("upstream addr");
    let upstream_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept upstream");
        let head = read_http_head(&mut stream).await;
        let head_end = head
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .expect("head terminator")
            + 4;
        let content_length = parse_content_length(&head[..head_end]);
        let mut body = head[head_end..].to_vec();
        while body.len() < content_length {
            let mut buf = vec![0_u8; content_length - body.len()];
            let read = stream.read(&mut buf).await.expect("read request body");
            assert!(read > 0, "request body truncated");
            body.extend_from_slice(&buf[..read]);
        }
        assert_eq!(body, b"name=value");

        let response = b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
        stream.write_all(response).await.expect("write response");
        stream.shutdown().await.expect("shutdown upstream");
    });

    let (proxy_addr, proxy_task, sink) = start_proxy(Policy::default()).await;
    let request = format!(
        "POST http://127.0.0.1:{}/submit HTTP/1.1\r\nContent-Length: 10\r\n\r\nname=value",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 201 Created"), "{response_text}");
    assert!(response_text.ends_with("ok"), "{response_text}");

    upstream_task.await.expect("upstream task");
    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::RequestCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn post_body_with_forbidden_word_is_blocked() {
    let (upstream_addr, accepts) = start_upstream(b"unreached".to_vec()).await;
    let policy = Policy::from_lists(vec!["casino"], Vec::<&str>::new());
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    let request = format!(
        "POST http://127.0.0.1:{}/submit HTTP/1.1\r\nContent-Length: 18\r\n\r\nvisit CASINO today",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 403 Forbidden"), "{response_text}");
    assert_eq!(accepts.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::RequestBlockedWord));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn response_with_forbidden_word_yields_503_and_no_original_bytes() {
    let body = "nothing to see except one casino advert";
    let upstream_response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let (upstream_addr, accepts) = start_upstream(upstream_response.into_bytes()).await;
    let policy = Policy::from_lists(vec!["casino"], Vec::<&str>::new());
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    let request = format!(
        "GET http://127.0.0.1:{}/page HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(
        response_text.starts_with("HTTP/1.1 503 Service Unavailable"),
        "{response_text}"
    );
    assert!(
        response_text
            .contains("The server response contains forbidden content and was blocked by the proxy."),
        "{response_text}"
    );
    assert!(!response_text.contains("casino"), "{response_text}");
    assert!(!response_text.contains("200 OK"), "{response_text}");
    assert_eq!(accepts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::ResponseBlockedWord));
    assert!(!sink.kinds().contains(&EventType::RequestCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunked_response_is_reemitted_with_identical_framing() {
    let upstream_response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n".to_vec();
    let (upstream_addr, _accepts) = start_upstream(upstream_response.clone()).await;
    let (proxy_addr, proxy_task, sink) = start_proxy(Policy::default()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/chunked HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    assert_eq!(response, upstream_response);

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::RequestCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunked_response_with_word_split_across_chunks_is_blocked() {
    let upstream_response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n3\r\ncas\r\n3\r\nino\r\n0\r\n\r\n".to_vec();
    let (upstream_addr, _accepts) = start_upstream(upstream_response).await;
    let policy = Policy::from_lists(vec!["casino"], Vec::<&str>::new());
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    let request = format!(
        "GET http://127.0.0.1:{}/chunked HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(
        response_text.starts_with("HTTP/1.1 503 Service Unavailable"),
        "{response_text}"
    );
    assert!(!response_text.contains("cas"), "{response_text}");

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::ResponseBlockedWord));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_delimited_response_is_forwarded() {
    let upstream_response =
        b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nstreamed until the server closes".to_vec();
    let (upstream_addr, _accepts) = start_upstream(upstream_response.clone()).await;
    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/stream HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    assert_eq!(response, upstream_response);
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn origin_form_without_host_yields_400() {
    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;

    let response = send_request(proxy_addr, b"GET /index.html HTTP/1.1\r\n\r\n").await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 400 Bad Request"), "{response_text}");
    assert!(
        response_text.contains("Unable to determine request host."),
        "{response_text}"
    );
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_request_line_yields_400() {
    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;

    let response = send_request(proxy_addr, b"NONSENSE\r\n\r\n").await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 400 Bad Request"), "{response_text}");
    assert!(response_text.contains("Malformed request line."), "{response_text}");
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_request_line_yields_400() {
    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;

    let mut request = vec![b'a'; 9000];
    request.extend_from_slice(b"\r\n\r\n");
    let response = send_request(proxy_addr, &request).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 400 Bad Request"), "{response_text}");
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn garbled_upstream_status_line_yields_400() {
    let (upstream_addr, accepts) = start_upstream(b"garbage\r\n\r\n".to_vec()).await;
    let (proxy_addr, proxy_task, _sink) = start_proxy(Policy::default()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/x HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 400 Bad Request"), "{response_text}");
    assert!(
        response_text.contains("Malformed response from upstream server."),
        "{response_text}"
    );
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    proxy_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_upstream_yields_502() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind then drop");
    let dead_port = listener.local_addr().expect("dead addr").port();
    drop(listener);

    let (proxy_addr, proxy_task, sink) = start_proxy(Policy::default()).await;
    let request =
        format!("GET http://127.0.0.1:{dead_port}/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 502 Bad Gateway"), "{response_text}");
    assert!(
        response_text.contains("Failed to connect to the upstream server."),
        "{response_text}"
    );

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    assert!(sink.kinds().contains(&EventType::UpstreamConnectFailed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn site_and_word_rules_from_one_policy_text_cover_all_outcomes() {
    let dirty_response =
        b"HTTP/1.1 200 OK\r\nContent-Length: 16\r\nConnection: close\r\n\r\nsee badword here".to_vec();
    let clean_response =
        b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\nall good".to_vec();
    let (dirty_addr, dirty_accepts) = start_upstream(dirty_response).await;
    let (clean_addr, clean_accepts) = start_upstream(clean_response.clone()).await;

    let policy = Policy::parse("# demo rules\nsite:blocked.example\nbadword\n");
    let (proxy_addr, proxy_task, sink) = start_proxy(policy).await;

    // Forbidden host: blocked before any resolution, so the bogus name is
    // never looked up and the client sees 403 rather than 502.
    let response =
        send_request(proxy_addr, b"GET http://blocked.example/ HTTP/1.1\r\n\r\n").await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 403 Forbidden"), "{response_text}");

    // Allowed host whose response body carries the forbidden word.
    let request = format!(
        "GET http://127.0.0.1:{}/y HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        dirty_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(
        response_text.starts_with("HTTP/1.1 503 Service Unavailable"),
        "{response_text}"
    );
    assert!(!response_text.contains("badword"), "{response_text}");
    assert_eq!(dirty_accepts.load(Ordering::SeqCst), 1);

    // Allowed host, clean traffic: forwarded untouched.
    let request = format!(
        "GET http://127.0.0.1:{}/x HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        clean_addr.port()
    );
    let response = send_request(proxy_addr, request.as_bytes()).await;
    assert_eq!(response, clean_response);
    assert_eq!(clean_accepts.load(Ordering::SeqCst), 1);

    // CONNECT to the forbidden host is refused without a tunnel.
    let response =
        send_request(proxy_addr, b"CONNECT blocked.example:443 HTTP/1.1\r\n\r\n").await;
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 403 Forbidden"), "{response_text}");
    assert!(!response_text.contains("200 Connection Established"), "{response_text}");

    tokio::time::sleep(Duration::from_millis(25)).await;
    proxy_task.abort();
    let kinds = sink.kinds();
    assert!(kinds.contains(&EventType::RequestBlockedHost));
    assert!(kinds.contains(&EventType::ResponseBlockedWord));
    assert!(kinds.contains(&EventType::RequestCompleted));
    assert!(kinds.contains(&EventType::ConnectBlockedHost));
    assert!(!kinds.contains(&EventType::TunnelEstablished));
}
