//! Encrypted tunnel acceptor for the server endpoint
//!
//! Each accepted peer stream starts with the IV and the encrypted address
//! header; both may arrive split across any number of reads. Once the
//! header parses, the origin is dialed and the relay takes over. There is
//! no failure reply on this protocol - a peer whose header does not decode
//! simply sees EOF.

use super::InboundListener;
use crate::common::net::{configure_tcp_stream, Address};
use crate::config::Config;
use crate::crypto::{EgressCipher, IngressCipher, KEY_LEN};
use crate::statistic::StatisticManager;
use crate::tunnel::{relay, Endpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Longest possible plaintext header: atyp + len + 255-byte domain + port.
const MAX_HEADER_LEN: usize = 1 + 1 + 255 + 2;

/// Tunnel protocol listener
pub struct TunnelListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    key: [u8; KEY_LEN],
    idle_timeout: Duration,
    statistic: Arc<StatisticManager>,
}

impl TunnelListener {
    pub async fn bind(config: &Config, statistic: Arc<StatisticManager>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.server_port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(TunnelListener {
            listener,
            local_addr,
            key: config.key(),
            idle_timeout: config.idle_timeout(),
            statistic,
        })
    }

    async fn handle_connection(
        key: [u8; KEY_LEN],
        idle_timeout: Duration,
        statistic: Arc<StatisticManager>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        if let Err(e) =
            Self::process_connection(key, idle_timeout, &statistic, &mut stream, peer_addr).await
        {
            warn!("tunnel connection error from {}: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        key: [u8; KEY_LEN],
        idle_timeout: Duration,
        statistic: &Arc<StatisticManager>,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let mut ingress = IngressCipher::new(key);
        let (address, port, payload) = Self::read_address_header(stream, &mut ingress).await?;

        debug!("tunnel {} -> {}:{}", peer_addr, address.to_host(), port);

        let conn_id = statistic.generate_id();
        statistic.add(&conn_id, peer_addr.ip().to_string(), peer_addr.port());

        let result = Self::run_tunnel(
            key,
            idle_timeout,
            statistic,
            stream,
            address,
            port,
            payload,
            ingress,
            &conn_id,
        )
        .await;
        statistic.close(&conn_id);
        result
    }

    /// Decrypt from the peer until the address header is complete.
    async fn read_address_header(
        stream: &mut TcpStream,
        ingress: &mut IngressCipher,
    ) -> Result<(Address, u16, BytesMut)> {
        let mut plain = BytesMut::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(if ingress.awaiting_iv() {
                    Error::crypto(format!(
                        "stream ended inside the IV ({} of 16 bytes)",
                        ingress.iv_bytes_seen()
                    ))
                } else {
                    Error::address("stream ended before the address header")
                });
            }
            plain.extend_from_slice(&ingress.decrypt(&buf[..n]));

            if let Some((address, port, consumed)) = Address::decode(&plain)? {
                // Whatever rode in behind the header is the first payload.
                let payload = plain.split_off(consumed);
                return Ok((address, port, payload));
            }
            if plain.len() > MAX_HEADER_LEN {
                return Err(Error::address("address header does not parse"));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tunnel(
        key: [u8; KEY_LEN],
        idle_timeout: Duration,
        statistic: &Arc<StatisticManager>,
        stream: &mut TcpStream,
        address: Address,
        port: u16,
        payload: BytesMut,
        ingress: IngressCipher,
        conn_id: &str,
    ) -> Result<()> {
        let host = address.to_host();
        let mut origin = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::connection(format!("origin {}:{}: {}", host, port, e)))?;
        configure_tcp_stream(&origin);

        if !payload.is_empty() {
            origin.write_all(&payload).await?;
            statistic.update(conn_id, payload.len() as u64, 0);
        }

        let egress = EgressCipher::new(&key)?;
        relay(
            &mut origin,
            stream,
            egress,
            ingress,
            Endpoint::Server,
            conn_id,
            statistic,
            idle_timeout,
        )
        .await
    }
}

#[async_trait]
impl InboundListener for TunnelListener {
    fn name(&self) -> &str {
        "tunnel"
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn start(&self) -> Result<()> {
        info!("tunnel acceptor listening on {}", self.local_addr);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    configure_tcp_stream(&stream);
                    let key = self.key;
                    let idle_timeout = self.idle_timeout;
                    let statistic = self.statistic.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(key, idle_timeout, statistic, stream, peer_addr)
                            .await;
                    });
                }
                Err(e) => error!("tunnel accept error: {}", e),
            }
        }
    }
}
