//! Inbound adapters (listeners)

mod http;
mod socks5;
mod tunnel;

pub use http::HttpProxyListener;
pub use socks5::Socks5Listener;
pub use tunnel::TunnelListener;

use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Trait for inbound listeners. Binding happens in the constructors so a
/// bind failure is fatal at startup; `start` only accepts and dispatches.
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Address the listener is bound to
    fn local_addr(&self) -> SocketAddr;

    /// Run the accept loop. Per-connection failures stay inside their
    /// spawned task and never end the loop.
    async fn start(&self) -> Result<()>;
}
