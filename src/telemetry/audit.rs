//! Audit log store and traffic statistics.
//!
//! [`AuditLog`] is the single owner of audit state shared by both proxies.
//! Appends go to an in-memory sequence and, when a file is configured, to an
//! append-only line file. Statistics are derived on demand.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::entry::{LogEntry, Protocol};
use super::error::TelemetryError;
use crate::config::DEFAULT_TOP_HOSTS;

/// Request count for one hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCount {
    /// Hostname as recorded.
    pub host: String,
    /// Number of entries for this hostname.
    pub count: usize,
}

/// Entries per protocol tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSplit {
    /// Plain HTTP requests.
    pub http: usize,
    /// HTTPS tunnels.
    pub https: usize,
}

/// Statistics derived from the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    /// Number of entries.
    pub total_requests: usize,
    /// Number of distinct hostnames.
    pub unique_hosts: usize,
    /// Entries per protocol.
    pub protocols: ProtocolSplit,
    /// Most frequent hostnames, descending by count, ties in first-seen order.
    pub top_hosts: Vec<HostCount>,
}

/// Point-in-time export of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// Statistics at that time.
    pub stats: TrafficStats,
    /// Every entry, oldest first.
    pub entries: Vec<LogEntry>,
}

/// Compute statistics over a sequence of entries.
pub fn compute_stats(entries: &[LogEntry], top_n: usize) -> TrafficStats {
    let mut protocols = ProtocolSplit::default();
    // Index into `counts`, which keeps first-seen order.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<HostCount> = Vec::new();

    for entry in entries {
        match entry.protocol {
            Protocol::Http => protocols.http += 1,
            Protocol::Https => protocols.https += 1,
        }

        match index.get(entry.hostname.as_str()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(entry.hostname.as_str(), counts.len());
                counts.push(HostCount {
                    host: entry.hostname.clone(),
                    count: 1,
                });
            }
        }
    }

    let unique_hosts = counts.len();

    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(top_n);

    TrafficStats {
        total_requests: entries.len(),
        unique_hosts,
        protocols,
        top_hosts: counts,
    }
}

#[derive(Debug, Default)]
struct AuditState {
    entries: Vec<LogEntry>,
    hosts: HashSet<String>,
}

/// Shared audit store.
///
/// Uses interior mutability so both proxies can record through an `Arc`.
pub struct AuditLog {
    state: Mutex<AuditState>,
    /// Append-only line file. None keeps the log in memory only.
    writer: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    top_n: usize,
}

impl AuditLog {
    /// Create an audit log that appends every entry to `path`.
    ///
    /// The file and its parent directory are created if missing; existing
    /// lines are kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| TelemetryError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TelemetryError::io(path, e))?;

        debug!("Appending audit lines to {:?}", path);
        Ok(Self {
            state: Mutex::new(AuditState::default()),
            writer: Some(Mutex::new(BufWriter::new(file))),
            path: Some(path.to_path_buf()),
            top_n: DEFAULT_TOP_HOSTS,
        })
    }

    /// Create an audit log that is not persisted.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(AuditState::default()),
            writer: None,
            path: None,
            top_n: DEFAULT_TOP_HOSTS,
        }
    }

    /// Set the ranking size used by [`AuditLog::stats`].
    #[must_use]
    pub fn with_top_hosts(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    /// Ranking size used by [`AuditLog::stats`].
    pub fn top_hosts(&self) -> usize {
        self.top_n
    }

    /// File the log appends to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock_state(&self) -> MutexGuard<'_, AuditState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry.
    ///
    /// A failed file write is reported on the diagnostic stream; the entry is
    /// still kept in memory.
    pub fn record(&self, entry: LogEntry) {
        let mut state = self.lock_state();

        if let Some(ref writer) = self.writer {
            let line = entry.to_line();
            match writer.lock() {
                Ok(mut writer) => {
                    if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                        error!("Failed to write audit line: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to acquire audit writer lock: {}", e);
                }
            }
        }

        debug!(
            method = %entry.method,
            host = %entry.hostname,
            protocol = %entry.protocol,
            "audit entry recorded"
        );
        state.hosts.insert(entry.hostname.clone());
        state.entries.push(entry);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Whether no entries have been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock_state().entries.is_empty()
    }

    /// Copy of every entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock_state().entries.clone()
    }

    /// Statistics with an explicit ranking size.
    pub fn compute_stats(&self, top_n: usize) -> TrafficStats {
        let state = self.lock_state();
        let mut stats = compute_stats(&state.entries, top_n);
        stats.unique_hosts = state.hosts.len();
        stats
    }

    /// Statistics with the configured ranking size.
    pub fn stats(&self) -> TrafficStats {
        self.compute_stats(self.top_n)
    }

    /// Consistent snapshot of stats and entries.
    pub fn snapshot(&self) -> AuditSnapshot {
        let state = self.lock_state();
        let mut stats = compute_stats(&state.entries, self.top_n);
        stats.unique_hosts = state.hosts.len();
        AuditSnapshot {
            exported_at: Utc::now(),
            stats,
            entries: state.entries.clone(),
        }
    }

    /// Write a snapshot as pretty JSON. Returns the number of entries written.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<usize, TelemetryError> {
        let path = path.as_ref();
        let snapshot = self.snapshot();

        let file = File::create(path).map_err(|e| TelemetryError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush().map_err(|e| TelemetryError::io(path, e))?;

        debug!("Exported {} audit entries to {:?}", snapshot.entries.len(), path);
        Ok(snapshot.entries.len())
    }

    /// Drop every in-memory entry. Returns how many were removed.
    ///
    /// The line file is append-only and is left untouched.
    pub fn clear(&self) -> usize {
        let mut state = self.lock_state();
        let removed = state.entries.len();
        state.entries.clear();
        state.hosts.clear();
        removed
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Read entries back from an audit line file.
///
/// Blank lines are skipped. Lines that do not parse are reported and skipped.
pub fn read_log_file(path: impl AsRef<Path>) -> Result<Vec<LogEntry>, TelemetryError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| TelemetryError::io(path, e))?;

    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| TelemetryError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match LogEntry::from_line(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping line {} of {:?}: {}", number + 1, path, e),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(host: &str, protocol: Protocol) -> LogEntry {
        LogEntry::new("GET", host, "/", protocol, None)
    }

    #[test]
    fn test_counts_match_entries() {
        let log = AuditLog::in_memory();
        let hosts = ["a.test", "b.test", "a.test", "c.test", "a.test", "b.test"];
        for host in hosts {
            log.record(entry(host, Protocol::Http));
        }

        let stats = log.compute_stats(10);
        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.unique_hosts, 3);
        assert_eq!(
            stats.top_hosts.iter().map(|h| h.count).sum::<usize>(),
            stats.total_requests
        );
    }

    #[test]
    fn test_top_hosts_ordering_and_ties() {
        let log = AuditLog::in_memory();
        // b and c tie at 2; b was seen first. d ties with e at 1; d first.
        for host in ["d.test", "b.test", "a.test", "c.test", "a.test", "b.test", "c.test", "a.test", "e.test"] {
            log.record(entry(host, Protocol::Http));
        }

        let stats = log.compute_stats(10);
        let order: Vec<(&str, usize)> = stats
            .top_hosts
            .iter()
            .map(|h| (h.host.as_str(), h.count))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.test", 3),
                ("b.test", 2),
                ("c.test", 2),
                ("d.test", 1),
                ("e.test", 1),
            ]
        );
    }

    #[test]
    fn test_top_n_truncates() {
        let log = AuditLog::in_memory().with_top_hosts(2);
        for host in ["a.test", "b.test", "c.test", "c.test"] {
            log.record(entry(host, Protocol::Http));
        }

        let stats = log.stats();
        assert_eq!(stats.top_hosts.len(), 2);
        assert_eq!(stats.top_hosts[0].host, "c.test");
        assert_eq!(stats.top_hosts[1].host, "a.test");
        assert_eq!(stats.unique_hosts, 3);
    }

    #[test]
    fn test_protocol_split() {
        let log = AuditLog::in_memory();
        log.record(entry("a.test", Protocol::Http));
        log.record(LogEntry::tunnel("a.test", None));
        log.record(LogEntry::tunnel("b.test", None));

        let stats = log.stats();
        assert_eq!(stats.protocols, ProtocolSplit { http: 1, https: 2 });
    }

    #[test]
    fn test_empty_stats() {
        let stats = AuditLog::in_memory().stats();
        assert_eq!(stats, TrafficStats::default());
    }

    #[test]
    fn test_clear() {
        let log = AuditLog::in_memory();
        log.record(entry("a.test", Protocol::Http));
        log.record(entry("b.test", Protocol::Http));

        assert_eq!(log.clear(), 2);
        assert!(log.is_empty());
        assert_eq!(log.stats().unique_hosts, 0);
        assert_eq!(log.clear(), 0);
    }

    #[test]
    fn test_open_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");

        let log = AuditLog::open(&path).unwrap();
        log.record(entry("a.test", Protocol::Http));
        log.record(LogEntry::tunnel("b.test", Some("curl/8".to_string())));
        drop(log);

        // Reopening keeps earlier lines.
        let log = AuditLog::open(&path).unwrap();
        log.record(entry("c.test", Protocol::Http));
        assert_eq!(log.len(), 1);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" | HTTP | GET | a.test/ | -"));
        assert!(lines[1].ends_with(" | HTTPS | CONNECT | b.test | curl/8"));
    }

    #[test]
    fn test_clear_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let log = AuditLog::open(&path).unwrap();
        log.record(entry("a.test", Protocol::Http));
        log.clear();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_read_log_file_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let log = AuditLog::open(&path).unwrap();
        log.record(entry("a.test", Protocol::Http));
        log.record(LogEntry::tunnel("b.test", None));
        drop(log);

        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("\ngarbage line\n\n");
        fs::write(&path, contents).unwrap();

        let entries = read_log_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].hostname, "a.test");
        assert_eq!(entries[0].path, "/");
        assert_eq!(entries[1].protocol, Protocol::Https);
    }

    #[test]
    fn test_export_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let log = AuditLog::in_memory();
        log.record(entry("a.test", Protocol::Http));
        log.record(entry("a.test", Protocol::Http));
        log.record(LogEntry::tunnel("b.test", None));

        assert_eq!(log.export(&path).unwrap(), 3);

        let snapshot: AuditSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snapshot.entries.len(), 3);
        assert_eq!(snapshot.stats.total_requests, 3);
        assert_eq!(snapshot.stats.unique_hosts, 2);
        assert_eq!(snapshot.stats.top_hosts[0].host, "a.test");

        // Exporting does not consume entries.
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let log = AuditLog::in_memory();
        let result = log.export("/nonexistent/sni-audit-proxy/snapshot.json");
        assert!(matches!(result, Err(TelemetryError::Io { .. })));
    }

    #[test]
    fn test_concurrent_records() {
        let log = Arc::new(AuditLog::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.record(entry(&format!("h{}.test", (t + i) % 5), Protocol::Http));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = log.stats();
        assert_eq!(stats.total_requests, 400);
        assert_eq!(stats.unique_hosts, 5);
    }
}
