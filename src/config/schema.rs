//! Configuration schema definitions.
//!
//! This module defines the structure of the sni-audit-proxy configuration files.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults: `config/default.toml`
//! 2. System config: `/etc/sni-audit-proxy/config.toml`
//! 3. User config: `~/.config/sni-audit-proxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default address both proxies bind to.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
/// Default port of the HTTP/CONNECT forward proxy.
pub const DEFAULT_HTTP_PORT: u16 = 8888;
/// Default port of the SNI tunnel proxy.
pub const DEFAULT_SNI_PORT: u16 = 8443;
/// Default port SNI tunnels connect to upstream.
pub const DEFAULT_UPSTREAM_PORT: u16 = 443;
/// Default host used when a ClientHello carries no usable server name.
pub const DEFAULT_FALLBACK_HOST: &str = "localhost";
/// Default size of the single read that captures a ClientHello.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;
/// Smallest accepted ClientHello read buffer.
pub const MIN_READ_BUFFER_SIZE: usize = 64;
/// Default number of hosts in the top-hosts ranking.
pub const DEFAULT_TOP_HOSTS: usize = 10;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Listener addresses.
    #[serde(default)]
    pub listen: ListenConfig,

    /// SNI tunnel behaviour.
    #[serde(default)]
    pub sni: SniConfig,

    /// Block list settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Audit log persistence and export.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Local control socket.
    #[serde(default)]
    pub control: ControlConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists (blocklist) are merged (appended).
    /// Scalars (ports, log_level, etc.) are overridden when the incoming value
    /// differs from its default.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.listen.merge(other.listen);
        self.sni.merge(other.sni);
        self.network.merge(other.network);
        self.audit.merge(other.audit);
        self.control.merge(other.control);
    }

    /// Check cross-field constraints after all sources have been merged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.http_port == 0 {
            return Err(ConfigError::invalid("listen.http_port", "must not be 0"));
        }
        if self.listen.sni_port == 0 {
            return Err(ConfigError::invalid("listen.sni_port", "must not be 0"));
        }
        if self.listen.http_port == self.listen.sni_port {
            return Err(ConfigError::invalid(
                "listen.sni_port",
                format!("must differ from http_port ({})", self.listen.http_port),
            ));
        }
        if self.sni.upstream_port == 0 {
            return Err(ConfigError::invalid("sni.upstream_port", "must not be 0"));
        }
        if self.sni.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(ConfigError::invalid(
                "sni.read_buffer_size",
                format!("must be at least {MIN_READ_BUFFER_SIZE} bytes"),
            ));
        }
        if self.sni.fallback_host.trim().is_empty() {
            return Err(ConfigError::invalid("sni.fallback_host", "must not be empty"));
        }
        if self.audit.top_hosts == 0 {
            return Err(ConfigError::invalid("audit.top_hosts", "must be at least 1"));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Listener configuration for both proxies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port of the HTTP/CONNECT forward proxy.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Port of the SNI tunnel proxy.
    #[serde(default = "default_sni_port")]
    pub sni_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: DEFAULT_HTTP_PORT,
            sni_port: DEFAULT_SNI_PORT,
        }
    }
}

impl ListenConfig {
    fn merge(&mut self, other: ListenConfig) {
        if other.bind_address != DEFAULT_BIND_ADDRESS {
            self.bind_address = other.bind_address;
        }
        if other.http_port != DEFAULT_HTTP_PORT {
            self.http_port = other.http_port;
        }
        if other.sni_port != DEFAULT_SNI_PORT {
            self.sni_port = other.sni_port;
        }
    }
}

/// What the SNI proxy does with a connection whose hostname cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownSniPolicy {
    /// Relay to the configured fallback host.
    #[default]
    Forward,
    /// Close the client connection.
    Block,
}

/// SNI tunnel configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SniConfig {
    /// Port tunnels connect to on the upstream host.
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,

    /// Handling of ClientHellos without a usable server name.
    #[serde(default)]
    pub unknown_sni: UnknownSniPolicy,

    /// Upstream host used by the `forward` policy.
    #[serde(default = "default_fallback_host")]
    pub fallback_host: String,

    /// Size of the single read used to capture the ClientHello.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for SniConfig {
    fn default() -> Self {
        Self {
            upstream_port: DEFAULT_UPSTREAM_PORT,
            unknown_sni: UnknownSniPolicy::default(),
            fallback_host: default_fallback_host(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl SniConfig {
    fn merge(&mut self, other: SniConfig) {
        if other.upstream_port != DEFAULT_UPSTREAM_PORT {
            self.upstream_port = other.upstream_port;
        }
        if other.unknown_sni != UnknownSniPolicy::default() {
            self.unknown_sni = other.unknown_sni;
        }
        if other.fallback_host != DEFAULT_FALLBACK_HOST {
            self.fallback_host = other.fallback_host;
        }
        if other.read_buffer_size != DEFAULT_READ_BUFFER_SIZE {
            self.read_buffer_size = other.read_buffer_size;
        }
    }
}

/// Block list configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Hostnames whose SNI tunnels are refused.
    ///
    /// Matching is exact after normalization (case, trailing dot). No wildcards.
    #[serde(default)]
    pub blocklist: Vec<String>,

    /// Optional file with one blocked hostname per line.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    #[serde(default)]
    pub blocklist_file: Option<PathBuf>,
}

impl NetworkConfig {
    fn merge(&mut self, other: NetworkConfig) {
        // Lists are merged (appended)
        self.blocklist.extend(other.blocklist);

        if other.blocklist_file.is_some() {
            self.blocklist_file = other.blocklist_file;
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Append-only audit line file. In-memory only when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Where to write the JSON snapshot on shutdown.
    #[serde(default)]
    pub export_path: Option<PathBuf>,

    /// Number of hosts in the top-hosts ranking.
    #[serde(default = "default_top_hosts")]
    pub top_hosts: usize,

    /// Write a snapshot to `export_path` when the proxy stops.
    #[serde(default)]
    pub export_on_shutdown: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            export_path: None,
            top_hosts: DEFAULT_TOP_HOSTS,
            export_on_shutdown: false,
        }
    }
}

impl AuditConfig {
    fn merge(&mut self, other: AuditConfig) {
        if other.log_file.is_some() {
            self.log_file = other.log_file;
        }
        if other.export_path.is_some() {
            self.export_path = other.export_path;
        }
        if other.top_hosts != DEFAULT_TOP_HOSTS {
            self.top_hosts = other.top_hosts;
        }
        if other.export_on_shutdown {
            self.export_on_shutdown = true;
        }
    }

    /// The snapshot path to write on shutdown, if exporting is enabled.
    pub fn shutdown_export_path(&self) -> Option<&PathBuf> {
        if self.export_on_shutdown {
            self.export_path.as_ref()
        } else {
            None
        }
    }
}

/// Control socket configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Whether to serve the control socket.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Socket path. Defaults to the runtime directory.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: None,
        }
    }
}

impl ControlConfig {
    fn merge(&mut self, other: ControlConfig) {
        if !other.enabled {
            self.enabled = false;
        }
        if other.socket_path.is_some() {
            self.socket_path = other.socket_path;
        }
    }
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_sni_port() -> u16 {
    DEFAULT_SNI_PORT
}

fn default_upstream_port() -> u16 {
    DEFAULT_UPSTREAM_PORT
}

fn default_fallback_host() -> String {
    DEFAULT_FALLBACK_HOST.to_string()
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_top_hosts() -> usize {
    DEFAULT_TOP_HOSTS
}

fn default_true() -> bool {
    true
}
