//! Leapfrog - encrypted SOCKS5 tunnel
//!
//! Two endpoints speak a private framing over TCP: the local endpoint
//! accepts SOCKS5 connections from user applications and forwards each one
//! through an AES-256-CFB stream to the server endpoint, which dials the
//! requested origin and relays bytes both ways. A plain HTTP/HTTPS forward
//! proxy and a small web monitor ride along.
//!
//! # Architecture
//!
//! ```text
//! user app --SOCKS5--> inbound/socks5 ---IV+CFB---> inbound/tunnel --TCP--> origin
//!                           |                            |
//!                           +------- tunnel/relay -------+
//!                           |                            |
//!                      statistic/                   statistic/
//!                           |                            |
//!                      monitor/ (HTTP)              monitor/ (HTTP)
//! ```

pub mod common;
pub mod config;
pub mod crypto;
pub mod inbound;
pub mod monitor;
pub mod statistic;
pub mod tunnel;

pub use common::error::{Error, Result};
pub use config::Config;

use inbound::InboundListener;
use monitor::Monitor;
use statistic::StatisticManager;
use std::sync::Arc;
use tracing::{info, warn};

pub const VERSION: &str = "1.0.0";

/// One endpoint process: bound listeners plus the monitor surface.
pub struct Gateway {
    statistic: Arc<StatisticManager>,
    listeners: Vec<Arc<dyn InboundListener>>,
    monitor: Monitor,
}

impl Gateway {
    /// Assemble the local endpoint: SOCKS5 front-end, plain HTTP proxy and
    /// monitor. Everything binds here so a port conflict fails startup
    /// instead of surfacing later inside a task.
    pub async fn local(config: Config) -> Result<Self> {
        let statistic = Arc::new(StatisticManager::new());

        let socks = inbound::Socks5Listener::bind(&config, statistic.clone()).await?;
        info!("SOCKS5 front-end configured on {}", socks.local_addr());

        let http = inbound::HttpProxyListener::bind(&config).await?;
        info!("HTTP proxy configured on {}", http.local_addr());

        let monitor = Monitor::bind(config.monitor_port, statistic.clone()).await?;

        let mut listeners: Vec<Arc<dyn InboundListener>> = Vec::new();
        listeners.push(Arc::new(socks));
        listeners.push(Arc::new(http));

        Ok(Gateway {
            statistic,
            listeners,
            monitor,
        })
    }

    /// Assemble the server endpoint: tunnel acceptor and monitor.
    pub async fn server(config: Config) -> Result<Self> {
        let statistic = Arc::new(StatisticManager::new());

        let tunnel = inbound::TunnelListener::bind(&config, statistic.clone()).await?;
        info!("tunnel acceptor configured on {}", tunnel.local_addr());

        let monitor = Monitor::bind(config.monitor_port, statistic.clone()).await?;

        let mut listeners: Vec<Arc<dyn InboundListener>> = Vec::new();
        listeners.push(Arc::new(tunnel));

        Ok(Gateway {
            statistic,
            listeners,
            monitor,
        })
    }

    /// Run all listeners until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let Gateway {
            listeners, monitor, ..
        } = self;

        let mut handles = Vec::new();

        for listener in listeners {
            handles.push(tokio::spawn(async move {
                if let Err(e) = listener.start().await {
                    warn!("{} listener error: {}", listener.name(), e);
                }
            }));
        }

        handles.push(tokio::spawn(async move {
            if let Err(e) = monitor.serve().await {
                warn!("monitor error: {}", e);
            }
        }));

        tokio::signal::ctrl_c().await?;
        info!("received shutdown signal");

        for handle in handles {
            handle.abort();
        }

        info!("gateway stopped");
        Ok(())
    }

    /// Get the accounting sink
    pub fn statistic(&self) -> &Arc<StatisticManager> {
        &self.statistic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }
}
