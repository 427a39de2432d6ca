//! Audit log entries and their line format.
//!
//! Each request seen by either proxy becomes one [`LogEntry`]. Entries are
//! persisted one per line:
//!
//! ```text
//! 2026-01-07T14:32:01.123Z | HTTPS | CONNECT | api.example.com | -
//! 2026-01-07T14:32:02.456Z | HTTP | GET | example.com/index.html | curl/8.5.0
//! ```
//!
//! The fields are the UTC timestamp (RFC 3339, milliseconds), protocol tag,
//! method, hostname immediately followed by the path, and the user agent or
//! `-` when the client sent none.

use super::error::TelemetryError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field separator of the audit line format.
pub const FIELD_SEPARATOR: &str = " | ";

/// Written in place of a missing user agent.
pub const NO_USER_AGENT: &str = "-";

/// Method recorded for tunnels.
pub const CONNECT_METHOD: &str = "CONNECT";

/// Protocol tag of an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Plain HTTP, relayed and visible to the proxy.
    Http,
    /// TLS traffic, tunneled opaquely.
    Https,
}

impl Protocol {
    /// Protocol implied by a URI scheme.
    pub fn from_scheme(scheme: &str) -> Self {
        if scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("wss") {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }

    /// Tag as written in audit lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            other => Err(TelemetryError::invalid_line(format!(
                "unknown protocol tag '{other}'"
            ))),
        }
    }
}

/// One audited request or tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the proxy accepted the request.
    pub timestamp: DateTime<Utc>,
    /// HTTP method, or `CONNECT` for tunnels.
    pub method: String,
    /// Destination hostname.
    pub hostname: String,
    /// Request path including query. Empty for tunnels.
    pub path: String,
    /// Protocol tag.
    pub protocol: Protocol,
    /// Client `User-Agent`, if sent.
    pub user_agent: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        method: impl Into<String>,
        hostname: impl Into<String>,
        path: impl Into<String>,
        protocol: Protocol,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.into(),
            hostname: hostname.into(),
            path: path.into(),
            protocol,
            user_agent,
        }
    }

    /// Entry for an established tunnel to `hostname`.
    pub fn tunnel(hostname: impl Into<String>, user_agent: Option<String>) -> Self {
        Self::new(CONNECT_METHOD, hostname, "", Protocol::Https, user_agent)
    }

    /// Render the entry as a single audit line (no trailing newline).
    pub fn to_line(&self) -> String {
        let user_agent = match self.user_agent.as_deref() {
            Some(ua) if !ua.is_empty() => ua,
            _ => NO_USER_AGENT,
        };

        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let sep = FIELD_SEPARATOR;

        format!(
            "{timestamp}{sep}{}{sep}{}{sep}{}{}{sep}{user_agent}",
            self.protocol, self.method, self.hostname, self.path
        )
    }

    /// Parse an audit line written by [`LogEntry::to_line`].
    ///
    /// The hostname ends at the first `/` of the fourth field. The user agent
    /// is the remainder of the line, so it may itself contain the separator.
    pub fn from_line(line: &str) -> Result<Self, TelemetryError> {
        let mut fields = line.trim_end_matches(['\r', '\n']).splitn(5, FIELD_SEPARATOR);
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| TelemetryError::invalid_line(format!("missing {name} field")))
        };

        let timestamp = next("timestamp")?;
        let protocol = next("protocol")?;
        let method = next("method")?;
        let target = next("target")?;
        let user_agent = next("user agent")?;

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| TelemetryError::invalid_line(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        let (hostname, path) = match target.find('/') {
            Some(idx) => target.split_at(idx),
            None => (target, ""),
        };
        if hostname.is_empty() {
            return Err(TelemetryError::invalid_line("empty hostname"));
        }

        Ok(Self {
            timestamp,
            method: method.to_string(),
            hostname: hostname.to_string(),
            path: path.to_string(),
            protocol: protocol.parse()?,
            user_agent: (user_agent != NO_USER_AGENT).then(|| user_agent.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 14, 32, 1).unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_protocol_from_scheme() {
        assert_eq!(Protocol::from_scheme("http"), Protocol::Http);
        assert_eq!(Protocol::from_scheme("HTTPS"), Protocol::Https);
        assert_eq!(Protocol::from_scheme("ftp"), Protocol::Http);
    }

    #[test]
    fn test_protocol_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Protocol::Https).unwrap(), "\"HTTPS\"");
    }

    #[test]
    fn test_tunnel_entry() {
        let entry = LogEntry::tunnel("api.example.com", None);
        assert_eq!(entry.method, "CONNECT");
        assert_eq!(entry.path, "");
        assert_eq!(entry.protocol, Protocol::Https);
    }

    #[test]
    fn test_to_line_format() {
        let mut entry = LogEntry::new(
            "GET",
            "example.com",
            "/index.html?q=1",
            Protocol::Http,
            Some("curl/8.5.0".to_string()),
        );
        entry.timestamp = fixed_time();

        assert_eq!(
            entry.to_line(),
            "2026-01-07T14:32:01.123Z | HTTP | GET | example.com/index.html?q=1 | curl/8.5.0"
        );
    }

    #[test]
    fn test_to_line_placeholder_user_agent() {
        let mut entry = LogEntry::tunnel("api.example.com", None);
        entry.timestamp = fixed_time();

        assert_eq!(
            entry.to_line(),
            "2026-01-07T14:32:01.123Z | HTTPS | CONNECT | api.example.com | -"
        );
    }

    #[test]
    fn test_from_line_recovers_entry() {
        let mut entry = LogEntry::new(
            "POST",
            "api.example.com",
            "/v1/items",
            Protocol::Http,
            Some("agent | with separator".to_string()),
        );
        entry.timestamp = fixed_time();

        let parsed = LogEntry::from_line(&entry.to_line()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_from_line_tunnel_without_path() {
        let parsed =
            LogEntry::from_line("2026-01-07T14:32:01.123Z | HTTPS | CONNECT | host.test | -\n")
                .unwrap();
        assert_eq!(parsed.hostname, "host.test");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.user_agent, None);
    }

    #[test]
    fn test_from_line_rejects_garbage() {
        assert!(LogEntry::from_line("").is_err());
        assert!(LogEntry::from_line("not | enough | fields").is_err());
        assert!(LogEntry::from_line("yesterday | HTTP | GET | a.test/ | -").is_err());
        assert!(
            LogEntry::from_line("2026-01-07T14:32:01.123Z | FTP | GET | a.test/ | -").is_err()
        );
    }
}
