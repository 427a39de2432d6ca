//! Hostname block list for the SNI tunnel.
//!
//! The block list is built once at startup from configuration and is
//! read-only afterwards, so it is shared between connection tasks through an
//! `Arc` without locking.
//!
//! # Matching
//!
//! Exact match only, no wildcards. Entries and lookups are normalized the same
//! way: surrounding whitespace trimmed, one trailing dot removed, ASCII
//! lowercased. `Example.COM.` therefore matches an entry `example.com`.
//!
//! # Example
//!
//! ```
//! use sni_audit_proxy::proxy::BlockList;
//!
//! let blocked = BlockList::new(["ads.example.com"]);
//! assert!(blocked.contains("ADS.example.com"));
//! assert!(!blocked.contains("example.com"));
//! ```

use crate::config::{ConfigError, NetworkConfig, load_blocklist_file};
use std::collections::HashSet;

/// Set of hostnames whose SNI tunnels are refused.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    /// Normalized hostnames.
    hosts: HashSet<String>,
}

impl BlockList {
    /// Build a block list from hostnames. Empty entries are ignored.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| normalize_host(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    /// Build the block list from the `[network]` section.
    ///
    /// Inline entries and the optional `blocklist_file` are combined.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, ConfigError> {
        let mut hosts = config.blocklist.clone();
        if let Some(ref path) = config.blocklist_file {
            hosts.extend(load_blocklist_file(path)?);
        }
        Ok(Self::new(hosts))
    }

    /// Whether a hostname is blocked.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(&normalize_host(host))
    }

    /// Number of distinct blocked hostnames.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether nothing is blocked.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Canonical form used for block list entries and lookups.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host.strip_suffix('.').unwrap_or(host);
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_exact_match() {
        let blocked = BlockList::new(["blocked.com", "ads.example.com"]);

        assert!(blocked.contains("blocked.com"));
        assert!(blocked.contains("ads.example.com"));
        assert!(!blocked.contains("example.com"));
        assert!(!blocked.contains("notblocked.com"));
    }

    #[test]
    fn test_no_wildcard_semantics() {
        let blocked = BlockList::new(["example.com", "*.evil.com"]);

        assert!(!blocked.contains("sub.example.com"));
        assert!(!blocked.contains("api.evil.com"));
        // A literal entry is still a literal entry
        assert!(blocked.contains("*.evil.com"));
    }

    #[test]
    fn test_case_insensitive_matching() {
        let blocked = BlockList::new(["Blocked.COM"]);

        assert!(blocked.contains("blocked.com"));
        assert!(blocked.contains("BLOCKED.COM"));
        assert!(blocked.contains("bLoCkEd.CoM"));
    }

    #[test]
    fn test_trailing_dot_and_whitespace() {
        let blocked = BlockList::new(["  blocked.com.  "]);

        assert!(blocked.contains("blocked.com"));
        assert!(blocked.contains("blocked.com."));
        assert_eq!(blocked.len(), 1);
    }

    #[test]
    fn test_duplicates_and_empty_entries() {
        let blocked = BlockList::new(["a.test", "A.TEST", "", "   ", "b.test"]);
        assert_eq!(blocked.len(), 2);
        assert!(!blocked.contains(""));
    }

    #[test]
    fn test_empty_list() {
        let blocked = BlockList::default();
        assert!(blocked.is_empty());
        assert!(!blocked.contains("anything.test"));
    }

    #[test]
    fn test_from_config_combines_file_and_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked.txt");
        fs::write(&path, "# comment\nfile.example.com\n").unwrap();

        let config = NetworkConfig {
            blocklist: vec!["inline.example.com".to_string()],
            blocklist_file: Some(path),
        };
        let blocked = BlockList::from_config(&config).unwrap();

        assert_eq!(blocked.len(), 2);
        assert!(blocked.contains("inline.example.com"));
        assert!(blocked.contains("file.example.com"));
    }

    #[test]
    fn test_from_config_missing_file() {
        let config = NetworkConfig {
            blocklist: vec![],
            blocklist_file: Some(PathBuf::from("/nonexistent/sni-audit-proxy/blocked.txt")),
        };
        assert!(BlockList::from_config(&config).is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.COM."), "example.com");
        assert_eq!(normalize_host(" api.test "), "api.test");
        assert_eq!(normalize_host("plain"), "plain");
    }
}
