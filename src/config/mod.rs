//! Configuration system for sni-audit-proxy.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`, compiled in)
//! 2. System config: `/etc/sni-audit-proxy/config.toml`
//! 3. User config: `~/.config/sni-audit-proxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! # Merge Behavior
//!
//! - **Lists** (blocklist) are **merged** (appended)
//! - **Scalars** (ports, log_level, etc.) are **overridden**
//!
//! # Example
//!
//! ```toml
//! [listen]
//! http_port = 3128
//!
//! [sni]
//! unknown_sni = "block"
//!
//! [network]
//! blocklist = ["ads.example.com"]
//! blocklist_file = "/etc/sni-audit-proxy/blocked.txt"
//!
//! [audit]
//! log_file = "/var/log/sni-audit-proxy/audit.log"
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, embedded_defaults, load_blocklist_file};
pub use schema::{
    AuditConfig, Config, ControlConfig, DEFAULT_BIND_ADDRESS, DEFAULT_FALLBACK_HOST,
    DEFAULT_HTTP_PORT, DEFAULT_READ_BUFFER_SIZE, DEFAULT_SNI_PORT, DEFAULT_TOP_HOSTS,
    DEFAULT_UPSTREAM_PORT, GeneralConfig, ListenConfig, MIN_READ_BUFFER_SIZE, NetworkConfig,
    SniConfig, UnknownSniPolicy,
};
