//! Shutter Server: HTTP archive server for recorded camera streams
//!
//! Serves the streams found under the storage directory as binary frame
//! archives and lets clients delete them.
//!
//! ## Usage
//!
//! ```bash
//! # Serve ./streams on port 8888
//! shutter-server
//!
//! # Custom storage directory and port
//! SHUTTER_STORAGE_PATH=/var/lib/shutter/streams SHUTTER_PORT=9000 shutter-server
//!
//! # Use recorded timestamps as-is instead of relative to the first frame
//! SHUTTER_ELAPSED_TIME=absolute shutter-server
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use shutter::archive::DEFAULT_PREFETCH;
use shutter::storage::{ElapsedTimeMapping, LocalRepository, LocalRepositoryConfig};
use shutter::service::DEFAULT_DELETE_WAIT;
use shutter::{ArchiveService, ServiceConfig};

/// Server configuration from environment
struct Config {
    storage_path: PathBuf,
    bind_ip: IpAddr,
    port: u16,
    elapsed_time: ElapsedTimeMapping,
    prefetch: usize,
    delete_wait: Duration,
}

impl Config {
    fn from_env() -> Self {
        let storage_path = std::env::var("SHUTTER_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./streams"));

        let bind_ip: IpAddr = std::env::var("SHUTTER_BIND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let port: u16 = std::env::var("SHUTTER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8888);

        let elapsed_time = match std::env::var("SHUTTER_ELAPSED_TIME") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}; using relative elapsed times", e);
                ElapsedTimeMapping::default()
            }),
            Err(_) => ElapsedTimeMapping::default(),
        };

        let prefetch: usize = std::env::var("SHUTTER_PREFETCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PREFETCH);

        let delete_wait = std::env::var("SHUTTER_DELETE_WAIT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DELETE_WAIT);

        Self {
            storage_path,
            bind_ip,
            port,
            elapsed_time,
            prefetch,
            delete_wait,
        }
    }

    fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = Config::from_env();

    info!("Shutter Server starting");
    info!("  Storage path: {:?}", config.storage_path);
    info!("  Elapsed time: {:?}", config.elapsed_time);
    info!("  Prefetch: {}", config.prefetch);
    info!("  Delete wait: {:?}", config.delete_wait);

    let repo = LocalRepository::new(LocalRepositoryConfig {
        root_path: config.storage_path.clone(),
        elapsed_time: config.elapsed_time,
    })
    .context("Failed to open stream storage")?;

    let service = Arc::new(ArchiveService::new(
        Arc::new(repo),
        ServiceConfig {
            prefetch: config.prefetch,
            delete_wait: config.delete_wait,
        },
    ));

    // Graceful shutdown
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                warn!("Failed to listen for shutdown signal: {}", e);
                return;
            }
        }
        signal_cancel.cancel();
    });

    let shutdown = cancel.clone();
    shutter::web::start(service, config.bind_addr(), async move {
        shutdown.cancelled().await
    })
    .await?;

    info!("Shutter Server stopped");
    Ok(())
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shutter=info".parse()?)
                .add_directive("shutter_server=info".parse()?),
        )
        .init();
    Ok(())
}
