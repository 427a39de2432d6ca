//! Destination resolution for forward-proxied requests.
//!
//! A plain (non-CONNECT) request names its destination in one of three ways,
//! tried in order:
//!
//! 1. Absolute URI in the request line: `GET http://example.com:8080/x HTTP/1.1`
//! 2. `Host` header with an origin-form target: `GET /x` + `Host: example.com`
//! 3. A `scheme://host[:port]path` URL embedded anywhere in the request target
//!
//! If none applies the request cannot be forwarded.

use crate::telemetry::Protocol;
use hyper::Uri;
use hyper::header::{HOST, HeaderMap};
use regex::Regex;
use std::sync::LazyLock;

/// Default port for plain HTTP destinations.
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Default port for HTTPS destinations and CONNECT targets.
pub const HTTPS_DEFAULT_PORT: u16 = 443;

static EMBEDDED_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z][a-zA-Z0-9+.-]*)://([^/:\s?#]+)(?::(\d+))?([^\s]*)").ok()
});

/// Where a plain request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// URI scheme, lowercase.
    pub scheme: String,
    /// Hostname or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Origin-form target: path and query, never empty.
    pub path: String,
}

impl Destination {
    fn new(scheme: &str, host: &str, port: Option<u16>, path: &str) -> Option<Self> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }

        let scheme = scheme.to_ascii_lowercase();
        let port = port
            .filter(|p| *p != 0)
            .unwrap_or_else(|| default_port(&scheme));
        let path = match path {
            "" => "/".to_string(),
            p if p.starts_with('/') || p == "*" => p.to_string(),
            p => format!("/{p}"),
        };

        Some(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Protocol tag for the audit log.
    pub fn protocol(&self) -> Protocol {
        Protocol::from_scheme(&self.scheme)
    }

    /// Value for the outbound `Host` header.
    ///
    /// The port is omitted when it is the scheme's default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == default_port(&self.scheme) {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// `host:port` for diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" || scheme == "wss" {
        HTTPS_DEFAULT_PORT
    } else {
        HTTP_DEFAULT_PORT
    }
}

/// Resolve where a plain request should go.
pub fn resolve(uri: &Uri, headers: &HeaderMap) -> Option<Destination> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    // 1. Absolute URI
    if let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) {
        return Destination::new(scheme, authority.host(), authority.port_u16(), path);
    }

    // 2. Host header + relative target
    if let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok())
        && let Some((host, port)) = split_host_port(host, HTTP_DEFAULT_PORT)
    {
        return Destination::new("http", &host, Some(port), path);
    }

    // 3. URL embedded in the target
    let target = uri.to_string();
    let captures = EMBEDDED_URL.as_ref()?.captures(&target)?;
    let port = captures.get(3).and_then(|m| m.as_str().parse().ok());
    Destination::new(
        captures.get(1)?.as_str(),
        captures.get(2)?.as_str(),
        port,
        captures.get(4).map_or("", |m| m.as_str()),
    )
}

/// Split `host[:port]` into its parts.
///
/// IPv6 literals must be bracketed to carry a port (`[::1]:443`); a bare IPv6
/// literal is taken as a host. A missing, zero or non-numeric port yields
/// `default_port`. Returns None for an empty host.
pub fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    let authority = authority.trim();
    let parse_port = |p: &str| p.parse::<u16>().ok().filter(|p| *p != 0);

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after
            .strip_prefix(':')
            .and_then(parse_port)
            .unwrap_or(default_port);
        return (!host.is_empty()).then(|| (host.to_string(), port));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            (host, parse_port(port).unwrap_or(default_port))
        }
        _ => (authority, default_port),
    };

    (!host.is_empty()).then(|| (host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with_host(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_str(host).unwrap());
        headers
    }

    #[test]
    fn test_absolute_uri() {
        let uri: Uri = "http://example.com:8080/a/b?c=d".parse().unwrap();
        let dest = resolve(&uri, &HeaderMap::new()).unwrap();

        assert_eq!(dest.scheme, "http");
        assert_eq!(dest.host, "example.com");
        assert_eq!(dest.port, 8080);
        assert_eq!(dest.path, "/a/b?c=d");
        assert_eq!(dest.protocol(), Protocol::Http);
    }

    #[test]
    fn test_absolute_uri_default_ports() {
        let uri: Uri = "http://example.com".parse().unwrap();
        let dest = resolve(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(dest.port, 80);
        assert_eq!(dest.path, "/");

        let uri: Uri = "https://secure.example.com/login".parse().unwrap();
        let dest = resolve(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(dest.port, 443);
        assert_eq!(dest.protocol(), Protocol::Https);
    }

    #[test]
    fn test_absolute_uri_wins_over_host_header() {
        let uri: Uri = "http://from-uri.test/x".parse().unwrap();
        let dest = resolve(&uri, &headers_with_host("from-header.test")).unwrap();
        assert_eq!(dest.host, "from-uri.test");
    }

    #[test]
    fn test_host_header_with_relative_target() {
        let uri: Uri = "/index.html".parse().unwrap();
        let dest = resolve(&uri, &headers_with_host("example.com:8081")).unwrap();

        assert_eq!(dest.scheme, "http");
        assert_eq!(dest.host, "example.com");
        assert_eq!(dest.port, 8081);
        assert_eq!(dest.path, "/index.html");
    }

    #[test]
    fn test_host_header_default_port() {
        let uri: Uri = "/".parse().unwrap();
        let dest = resolve(&uri, &headers_with_host("example.com")).unwrap();
        assert_eq!(dest.port, 80);
    }

    #[test]
    fn test_embedded_url_fallback() {
        let uri: Uri = "/http://embedded.test:9000/path?q=1".parse().unwrap();
        let dest = resolve(&uri, &HeaderMap::new()).unwrap();

        assert_eq!(dest.host, "embedded.test");
        assert_eq!(dest.port, 9000);
        assert_eq!(dest.path, "/path?q=1");
    }

    #[test]
    fn test_unresolvable() {
        let uri: Uri = "/just/a/path".parse().unwrap();
        assert_eq!(resolve(&uri, &HeaderMap::new()), None);
    }

    #[test]
    fn test_host_header_for_destination() {
        let dest = Destination::new("http", "example.com", Some(80), "/").unwrap();
        assert_eq!(dest.host_header(), "example.com");

        let dest = Destination::new("http", "example.com", Some(8080), "/").unwrap();
        assert_eq!(dest.host_header(), "example.com:8080");

        let dest = Destination::new("http", "[::1]", Some(8080), "/").unwrap();
        assert_eq!(dest.host, "::1");
        assert_eq!(dest.host_header(), "[::1]:8080");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("api.example.com:443", 80),
            Some(("api.example.com".to_string(), 443))
        );
        assert_eq!(
            split_host_port("api.example.com", 443),
            Some(("api.example.com".to_string(), 443))
        );
        assert_eq!(
            split_host_port("api.example.com:8443", 443),
            Some(("api.example.com".to_string(), 8443))
        );
    }

    #[test]
    fn test_split_host_port_non_numeric_port_uses_default() {
        assert_eq!(
            split_host_port("api.example.com:https", 443),
            Some(("api.example.com".to_string(), 443))
        );
        assert_eq!(
            split_host_port("api.example.com:0", 443),
            Some(("api.example.com".to_string(), 443))
        );
    }

    #[test]
    fn test_split_host_port_ipv6() {
        assert_eq!(split_host_port("[::1]:8443", 443), Some(("::1".to_string(), 8443)));
        assert_eq!(split_host_port("[::1]", 443), Some(("::1".to_string(), 443)));
        assert_eq!(split_host_port("::1", 443), Some(("::1".to_string(), 443)));
    }

    #[test]
    fn test_split_host_port_empty() {
        assert_eq!(split_host_port("", 443), None);
        assert_eq!(split_host_port(":443", 443), None);
        assert_eq!(split_host_port("[]:443", 443), None);
    }
}
