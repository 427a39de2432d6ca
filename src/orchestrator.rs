//! Proxy lifecycle management.
//!
//! Builds the shared state from the configuration, binds both listeners,
//! starts the control socket, and runs until Ctrl-C. On shutdown the
//! listeners stop accepting, and a snapshot is exported when configured.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AuditConfig, Config};
use crate::control::{ControlServer, default_socket_path};
use crate::proxy::{BlockList, ForwardProxyServer, ProxyContext, SniProxyServer};
use crate::telemetry::AuditLog;

/// How long to wait for each server task after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Run both proxies until Ctrl-C.
pub fn run(config: Config) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(serve(config))
}

/// Build the block list and audit store described by `config`.
pub fn build_context(config: &Config) -> Result<ProxyContext> {
    let block_list =
        BlockList::from_config(&config.network).context("Failed to load block list")?;
    info!("Block list has {} entries", block_list.len());

    let audit = open_audit_log(&config.audit)?;
    Ok(ProxyContext::new(Arc::new(block_list), Arc::new(audit)))
}

fn open_audit_log(config: &AuditConfig) -> Result<AuditLog> {
    let audit = match &config.log_file {
        Some(path) => AuditLog::open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?,
        None => AuditLog::in_memory(),
    };
    Ok(audit.with_top_hosts(config.top_hosts))
}

/// Control socket location from the configuration.
pub fn control_socket_path(config: &Config) -> PathBuf {
    config
        .control
        .socket_path
        .clone()
        .unwrap_or_else(default_socket_path)
}

async fn serve(config: Config) -> Result<()> {
    let ctx = build_context(&config)?;
    let audit = ctx.audit.clone();
    match audit.path() {
        Some(path) => info!("Appending audit entries to {:?}", path),
        None => info!("Audit entries kept in memory only"),
    }

    let bind = config.listen.bind_address.as_str();
    let http_listener = TcpListener::bind((bind, config.listen.http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP proxy to {}:{}", bind, config.listen.http_port))?;
    let sni_listener = TcpListener::bind((bind, config.listen.sni_port))
        .await
        .with_context(|| format!("Failed to bind SNI proxy to {}:{}", bind, config.listen.sni_port))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = ForwardProxyServer::new(ctx.clone(), shutdown_rx.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.serve(http_listener).await {
            error!("HTTP proxy error: {}", e);
        }
    });

    let sni_server = SniProxyServer::new(config.sni.clone(), ctx, shutdown_rx.clone());
    let sni_handle = tokio::spawn(async move {
        if let Err(e) = sni_server.serve(sni_listener).await {
            error!("SNI proxy error: {}", e);
        }
    });

    let control_handle = if config.control.enabled {
        spawn_control_server(control_socket_path(&config), audit.clone(), shutdown_rx)
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, http_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sni_handle).await;
    if let Some(handle) = control_handle {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }

    if let Some(path) = config.audit.shutdown_export_path() {
        let entries = audit
            .export(path)
            .with_context(|| format!("Failed to export audit log to {}", path.display()))?;
        info!("Exported {} audit entries to {:?}", entries, path);
    }

    Ok(())
}

/// Start the control socket; the proxies keep running if it cannot bind.
fn spawn_control_server(
    path: PathBuf,
    audit: Arc<AuditLog>,
    shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    match ControlServer::bind(&path) {
        Ok(server) => Some(tokio::spawn(async move {
            if let Err(e) = server.run(audit, shutdown_rx).await {
                error!("Control socket error: {}", e);
            }
        })),
        Err(e) => {
            warn!("Control socket disabled: cannot bind {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    #[test]
    fn test_build_context_in_memory() {
        let config = Config {
            network: NetworkConfig {
                blocklist: vec!["Blocked.Test".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let ctx = build_context(&config).unwrap();
        assert!(ctx.block_list.contains("blocked.test"));
        assert!(ctx.audit.path().is_none());
        assert_eq!(ctx.audit.top_hosts(), config.audit.top_hosts);
    }

    #[test]
    fn test_build_context_with_audit_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.audit.log_file = Some(dir.path().join("logs").join("audit.log"));
        config.audit.top_hosts = 3;

        let ctx = build_context(&config).unwrap();
        assert_eq!(ctx.audit.path(), config.audit.log_file.as_deref());
        assert_eq!(ctx.audit.top_hosts(), 3);
    }

    #[test]
    fn test_build_context_missing_blocklist_file() {
        let mut config = Config::default();
        config.network.blocklist_file = Some(PathBuf::from("/nonexistent/blocklist.txt"));
        assert!(build_context(&config).is_err());
    }

    #[test]
    fn test_control_socket_path() {
        let mut config = Config::default();
        assert_eq!(control_socket_path(&config), default_socket_path());

        config.control.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        assert_eq!(control_socket_path(&config), PathBuf::from("/tmp/custom.sock"));
    }
}
