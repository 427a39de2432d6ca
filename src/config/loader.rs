//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/sni-audit-proxy/config.toml`
//! 3. User config: `~/.config/sni-audit-proxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Lists (blocklist) are **merged** (appended).
//! Scalars (ports, log_level) are **overridden**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, NetworkConfig};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sni-audit-proxy/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "sni-audit-proxy";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Defaults shipped with the binary.
const EMBEDDED_DEFAULTS: &str = include_str!("../../config/default.toml");

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. Invalid TOML is an error
    /// (fail fast with clear message). The merged result is validated.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = embedded_defaults()?;
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        apply_cli_flags(&mut config, cli);

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the defaults compiled into the binary.
pub fn embedded_defaults() -> Result<Config, ConfigError> {
    toml::from_str(EMBEDDED_DEFAULTS).map_err(|e| ConfigError::ParseError {
        path: PathBuf::from("<embedded:default.toml>"),
        source: e,
    })
}

/// CLI flags take precedence over every file.
fn apply_cli_flags(config: &mut Config, cli: &Cli) {
    if let Some(ref bind) = cli.bind {
        config.listen.bind_address = bind.clone();
    }
    if let Some(port) = cli.http_port {
        config.listen.http_port = port;
    }
    if let Some(port) = cli.sni_port {
        config.listen.sni_port = port;
    }

    if !cli.block.is_empty() {
        config.merge(Config {
            network: NetworkConfig {
                blocklist: cli.block.clone(),
                ..Default::default()
            },
            ..Default::default()
        });
        debug!("Added {} blocked domains from CLI flags", cli.block.len());
    }

    if let Some(ref path) = cli.audit_log {
        config.audit.log_file = Some(path.clone());
    }
    if let Some(ref path) = cli.export_on_exit {
        config.audit.export_path = Some(path.clone());
        config.audit.export_on_shutdown = true;
    }
}

/// Load a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
            Ok(Some(config))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Read a block list file: one hostname per line.
///
/// Surrounding whitespace is trimmed; blank lines and `#` comments are skipped.
/// Unlike config files, a missing block list file is an error.
pub fn load_blocklist_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
