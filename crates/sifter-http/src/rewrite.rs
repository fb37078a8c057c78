use crate::head::{HeaderBlock, RequestLine};
use crate::target::Target;

/// Rebuilds the request head for the upstream connection.
///
/// The request line is rewritten to origin-form. Header lines pass through
/// verbatim and in original order, except: `Proxy-Connection` lines are
/// dropped, every `Connection` line is replaced in place by
/// `Connection: close`, and a `Host` header is appended when the client sent
/// none (bare host for port 80, `host:port` otherwise).
pub fn build_upstream_request_head(
    line: &RequestLine,
    headers: &HeaderBlock,
    target: &Target,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(line.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.path.as_bytes());
    out.push(b' ');
    out.extend_from_slice(line.version.as_bytes());
    out.extend_from_slice(b"\r\n");

    let mut has_host = false;
    for raw in headers.lines() {
        let name = raw
            .split_once(':')
            .map_or(raw.as_str(), |(name, _)| name)
            .trim();
        if name.eq_ignore_ascii_case("proxy-connection") {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            out.extend_from_slice(b"Connection: close\r\n");
            continue;
        }
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        out.extend_from_slice(raw.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !has_host {
        out.extend_from_slice(b"Host: ");
        if target.port == 80 {
            out.extend_from_slice(target.host.as_bytes());
        } else {
            out.extend_from_slice(target.authority().as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::build_upstream_request_head;
    use crate::head::{HeaderBlock, RequestLine};
    use crate::target::{resolve_target, Target};

    fn build(line: &str, header_lines: &[&str]) -> String {
        let parsed = RequestLine::parse(line).unwrap();
        let mut headers = HeaderBlock::new(4096);
        for header in header_lines {
            headers.push_line(header).unwrap();
        }
        let target = resolve_target(&parsed, &headers).unwrap();
        String::from_utf8(build_upstream_request_head(&parsed, &headers, &target)).unwrap()
    }

    #[test]
    fn absolute_target_becomes_origin_form() {
        let head = build(
            "GET http://example.com/a?b=c HTTP/1.1",
            &["Host: example.com", "Accept: */*"],
        );
        assert_eq!(
            head,
            "GET /a?b=c HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn proxy_connection_is_dropped_and_connection_replaced_in_place() {
        let head = build(
            "GET http://example.com/ HTTP/1.1",
            &[
                "Host: example.com",
                "Connection: keep-alive",
                "Proxy-Connection: keep-alive",
                "User-Agent: curl/8.7.1",
            ],
        );
        assert_eq!(
            head,
            "GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\nUser-Agent: curl/8.7.1\r\n\r\n"
        );
    }

    #[test]
    fn every_connection_line_is_replaced() {
        let head = build(
            "GET http://example.com/ HTTP/1.1",
            &["Host: x", "Connection: a", "Connection: b"],
        );
        assert_eq!(head.matches("Connection: close\r\n").count(), 2);
        assert!(!head.contains("Connection: a"));
    }

    #[test]
    fn host_is_injected_only_when_missing() {
        let head = build("GET http://example.com/ HTTP/1.1", &["Accept: */*"]);
        assert_eq!(head, "GET / HTTP/1.1\r\nAccept: */*\r\nHost: example.com\r\n\r\n");

        let head = build("GET http://example.com:8081/ HTTP/1.1", &[]);
        assert_eq!(head, "GET / HTTP/1.1\r\nHost: example.com:8081\r\n\r\n");
    }

    #[test]
    fn unrelated_lines_pass_verbatim() {
        let parsed = RequestLine::parse("POST /submit HTTP/1.1").unwrap();
        let mut headers = HeaderBlock::new(4096);
        headers.push_line("Host: example.com").unwrap();
        headers.push_line("not a header line").unwrap();
        headers.push_line("X-Padded:    value   ").unwrap();
        let target = Target {
            host: "example.com".to_string(),
            port: 80,
            path: "/submit".to_string(),
        };
        let head =
            String::from_utf8(build_upstream_request_head(&parsed, &headers, &target)).unwrap();
        assert_eq!(
            head,
            "POST /submit HTTP/1.1\r\nHost: example.com\r\nnot a header line\r\nX-Padded:    value   \r\n\r\n"
        );
    }
}
