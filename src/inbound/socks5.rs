//! SOCKS5 front-end for the local endpoint
//!
//! Speaks the no-auth CONNECT dialogue with user applications, then opens
//! the encrypted tunnel to the configured server and hands both sockets to
//! the relay. Per the protocol the success reply goes out before the server
//! dial, so a dial failure past that point can only surface to the user as
//! EOF.

use super::InboundListener;
use crate::common::net::{configure_tcp_stream, Address};
use crate::common::socks::{
    self, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, CMD_CONNECT, REP_ADDRESS_TYPE_NOT_SUPPORTED,
    REP_COMMAND_NOT_SUPPORTED, REP_GENERAL_FAILURE, REP_SUCCEEDED, SOCKS5_VERSION,
};
use crate::config::Config;
use crate::crypto::{EgressCipher, IngressCipher, KEY_LEN};
use crate::statistic::StatisticManager;
use crate::tunnel::{relay, Endpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Tunnel parameters shared by every accepted connection.
struct TunnelTarget {
    server: String,
    server_port: u16,
    key: [u8; KEY_LEN],
    idle_timeout: Duration,
}

/// SOCKS5 proxy listener
pub struct Socks5Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    target: Arc<TunnelTarget>,
    statistic: Arc<StatisticManager>,
}

impl Socks5Listener {
    pub async fn bind(config: &Config, statistic: Arc<StatisticManager>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.local_port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Socks5Listener {
            listener,
            local_addr,
            target: Arc::new(TunnelTarget {
                server: config.server.clone(),
                server_port: config.server_port,
                key: config.key(),
                idle_timeout: config.idle_timeout(),
            }),
            statistic,
        })
    }

    async fn handle_connection(
        target: Arc<TunnelTarget>,
        statistic: Arc<StatisticManager>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        if let Err(e) =
            Self::process_connection(&target, &statistic, &mut stream, peer_addr).await
        {
            debug!("SOCKS5 connection error from {}: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        target: &TunnelTarget,
        statistic: &Arc<StatisticManager>,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        socks::read_greeting(stream).await?;
        socks::write_method_reply(stream).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "unsupported SOCKS version: {}",
                header[0]
            )));
        }
        if header[1] != CMD_CONNECT {
            socks::write_reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
            return Err(Error::unsupported(format!(
                "SOCKS5 command {} not supported",
                header[1]
            )));
        }

        let (address, port) = Self::read_destination(stream, header[3]).await?;

        // A destination the tunnel header cannot carry must fail here,
        // before the success reply reaches the user.
        let encoded = match address.encode(port) {
            Ok(encoded) => encoded,
            Err(e) => {
                socks::write_reply(stream, REP_GENERAL_FAILURE).await?;
                return Err(e);
            }
        };

        socks::write_reply(stream, REP_SUCCEEDED).await?;

        debug!(
            "SOCKS5 CONNECT {} -> {}:{}",
            peer_addr,
            address.to_host(),
            port
        );

        let mut remote = TcpStream::connect((target.server.as_str(), target.server_port))
            .await
            .map_err(|e| {
                warn!(
                    "tunnel server {}:{} unreachable: {}",
                    target.server, target.server_port, e
                );
                Error::connection(format!(
                    "tunnel server {}:{}: {}",
                    target.server, target.server_port, e
                ))
            })?;
        configure_tcp_stream(&remote);

        let conn_id = statistic.generate_id();
        statistic.add(&conn_id, peer_addr.ip().to_string(), peer_addr.port());

        let result = Self::run_tunnel(
            target,
            statistic,
            stream,
            &mut remote,
            &encoded,
            &conn_id,
        )
        .await;
        statistic.close(&conn_id);
        result
    }

    async fn read_destination(stream: &mut TcpStream, atyp: u8) -> Result<(Address, u16)> {
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                stream.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                Ok((addr, u16::from_be_bytes([buf[4], buf[5]])))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                stream.read_exact(&mut buf).await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                buf.truncate(len);
                match String::from_utf8(buf) {
                    Ok(domain) => Ok((Address::Domain(domain), port)),
                    Err(_) => {
                        socks::write_reply(stream, REP_GENERAL_FAILURE).await?;
                        Err(Error::address("domain in SOCKS5 request is not UTF-8"))
                    }
                }
            }
            ATYP_IPV6 => {
                // The tunnel header has no IPv6 form; read the address out
                // and refuse cleanly.
                let mut buf = [0u8; 18];
                stream.read_exact(&mut buf).await?;
                socks::write_reply(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                Err(Error::unsupported("IPv6 destinations are not supported"))
            }
            t => {
                socks::write_reply(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                Err(Error::protocol(format!(
                    "unknown SOCKS5 address type: {}",
                    t
                )))
            }
        }
    }

    async fn run_tunnel(
        target: &TunnelTarget,
        statistic: &Arc<StatisticManager>,
        stream: &mut TcpStream,
        remote: &mut TcpStream,
        encoded_addr: &[u8],
        conn_id: &str,
    ) -> Result<()> {
        let mut egress = EgressCipher::new(&target.key)?;
        let ingress = IngressCipher::new(target.key);

        // First emission on the wire: IV followed by the encrypted address
        // header.
        let first = egress.encrypt(encoded_addr);
        remote.write_all(&first).await?;
        statistic.update(conn_id, 0, first.len() as u64);

        relay(
            stream,
            remote,
            egress,
            ingress,
            Endpoint::Local,
            conn_id,
            statistic,
            target.idle_timeout,
        )
        .await
    }
}

#[async_trait]
impl InboundListener for Socks5Listener {
    fn name(&self) -> &str {
        "SOCKS5"
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn start(&self) -> Result<()> {
        info!("SOCKS5 front-end listening on {}", self.local_addr);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    configure_tcp_stream(&stream);
                    let target = self.target.clone();
                    let statistic = self.statistic.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(target, statistic, stream, peer_addr).await;
                    });
                }
                Err(e) => error!("SOCKS5 accept error: {}", e),
            }
        }
    }
}
