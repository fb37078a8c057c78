use http::uri::Authority;
use http::Uri;

use crate::error::ParseError;
use crate::head::{HeaderBlock, RequestLine};

/// Where a proxied request goes, plus the origin-form path to put on the
/// rewritten request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolves a non-CONNECT request target.
///
/// Absolute-URI targets carry their own authority, with the port defaulting
/// to 80 or 443 by scheme; anything else is treated as origin-form and the
/// authority comes from the `Host` header (default port 80). The resolved
/// path is what gets forwarded: the upstream always sees an origin-form
/// request line.
pub fn resolve_target(line: &RequestLine, headers: &HeaderBlock) -> Result<Target, ParseError> {
    if line.target.starts_with("http://") || line.target.starts_with("https://") {
        resolve_absolute_target(&line.target)
    } else {
        resolve_origin_target(line, headers)
    }
}

fn resolve_absolute_target(target: &str) -> Result<Target, ParseError> {
    let uri = target
        .parse::<Uri>()
        .map_err(|_| ParseError::InvalidTarget(target.to_string()))?;
    let default_port = if target.starts_with("https://") {
        443
    } else {
        80
    };
    let host = uri
        .host()
        .ok_or_else(|| ParseError::InvalidTarget(target.to_string()))?;
    let path = uri
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Ok(Target {
        host: strip_ipv6_brackets(host).to_string(),
        port: uri.port_u16().unwrap_or(default_port),
        path,
    })
}

fn resolve_origin_target(line: &RequestLine, headers: &HeaderBlock) -> Result<Target, ParseError> {
    let host_header = headers.get("host").ok_or(ParseError::MissingHost)?;
    let authority = host_header
        .parse::<Authority>()
        .map_err(|_| ParseError::MissingHost)?;
    Ok(Target {
        host: strip_ipv6_brackets(authority.host()).to_string(),
        port: authority.port_u16().unwrap_or(80),
        path: line.target.clone(),
    })
}

/// Parses a `CONNECT` target of the form `host[:port]`, defaulting to port
/// 443. Bracketed IPv6 literals are accepted and returned without brackets.
///
/// Authority-form only: userinfo is rejected, and a present-but-unparseable
/// port section is an error rather than a fall-through to the default.
pub fn parse_connect_authority(target: &str) -> Result<(String, u16), ParseError> {
    if target.contains('@') {
        return Err(ParseError::MalformedConnectTarget(target.to_string()));
    }
    let authority = target
        .parse::<Authority>()
        .map_err(|_| ParseError::MalformedConnectTarget(target.to_string()))?;
    let host = authority.host();
    if strip_ipv6_brackets(host).is_empty() {
        return Err(ParseError::MalformedConnectTarget(target.to_string()));
    }
    // With userinfo excluded the authority text starts at the host, so
    // everything past it is the port section (if any).
    let port = match (&target[host.len()..], authority.port_u16()) {
        ("", None) => 443,
        (_, Some(port)) => port,
        (_, None) => return Err(ParseError::MalformedConnectTarget(target.to_string())),
    };
    Ok((strip_ipv6_brackets(host).to_string(), port))
}

fn strip_ipv6_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
}
