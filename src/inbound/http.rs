//! Plain HTTP/HTTPS forward proxy for local use
//!
//! CONNECT requests get `200 Connection established` and a raw splice. Any
//! other method must use an absolute-form request line; the request bytes
//! are forwarded to the origin exactly as received. No crypto, no tunnel
//! framing.

use super::InboundListener;
use crate::common::net::configure_tcp_stream;
use crate::config::Config;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

const MAX_REQUEST_HEAD: usize = 8192;

/// HTTP proxy listener
pub struct HttpProxyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpProxyListener {
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.http_port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(HttpProxyListener {
            listener,
            local_addr,
        })
    }

    async fn handle_connection(mut stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = Self::process_connection(&mut stream, peer_addr).await {
            debug!("HTTP proxy error from {}: {}", peer_addr, e);
        }
    }

    async fn process_connection(stream: &mut TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let (head, head_len) = Self::read_request_head(stream).await?;

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut request = httparse::Request::new(&mut headers);
        request
            .parse(&head)
            .map_err(|e| Error::protocol(format!("bad HTTP request: {}", e)))?;
        let method = request
            .method
            .ok_or_else(|| Error::protocol("missing HTTP method"))?;
        let target = request
            .path
            .ok_or_else(|| Error::protocol("missing request target"))?;

        let (host, port) = if method.eq_ignore_ascii_case("CONNECT") {
            split_host_port(target, 443)?
        } else {
            parse_absolute_form(target)?
        };
        let connect = method.eq_ignore_ascii_case("CONNECT");

        debug!("HTTP {} {} -> {}:{}", method, peer_addr, host, port);

        let mut origin = match TcpStream::connect((host.as_str(), port)).await {
            Ok(origin) => origin,
            Err(e) => {
                let _ = stream
                    .write_all(b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n")
                    .await;
                return Err(Error::connection(format!(
                    "origin {}:{}: {}",
                    host, port, e
                )));
            }
        };
        configure_tcp_stream(&origin);

        if connect {
            stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await?;
            // Bytes the client pipelined behind the CONNECT head (an eager
            // TLS hello, typically) belong to the spliced stream.
            if head.len() > head_len {
                origin.write_all(&head[head_len..]).await?;
            }
        } else {
            // Forward the request as received, including any body bytes
            // that arrived with the head.
            origin.write_all(&head).await?;
        }

        let _ = tokio::io::copy_bidirectional(stream, &mut origin).await;
        Ok(())
    }

    /// Read until the end of the header block. Returns the buffer plus the
    /// offset just past the blank line; bytes beyond it arrived early and
    /// stay in the buffer.
    async fn read_request_head(stream: &mut TcpStream) -> Result<(BytesMut, usize)> {
        let mut head = BytesMut::with_capacity(1024);
        let mut buf = [0u8; 1024];

        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::protocol("connection closed before request head"));
            }
            head.extend_from_slice(&buf[..n]);
            if let Some(pos) = head.windows(4).position(|w| w == b"\r\n\r\n") {
                return Ok((head, pos + 4));
            }
            if head.len() > MAX_REQUEST_HEAD {
                return Err(Error::protocol("request head too large"));
            }
        }
    }
}

#[async_trait]
impl InboundListener for HttpProxyListener {
    fn name(&self) -> &str {
        "HTTP"
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn start(&self) -> Result<()> {
        info!("HTTP proxy listening on {}", self.local_addr);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    configure_tcp_stream(&stream);
                    tokio::spawn(async move {
                        Self::handle_connection(stream, peer_addr).await;
                    });
                }
                Err(e) => error!("HTTP accept error: {}", e),
            }
        }
    }
}

/// Split `host[:port]`, falling back to `default_port`.
fn split_host_port(target: &str, default_port: u16) -> Result<(String, u16)> {
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::protocol(format!("bad port in {}", target)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((target.to_string(), default_port)),
    }
}

/// Pull host and port out of an absolute-form request target like
/// `http://example.com:8080/path`.
fn parse_absolute_form(target: &str) -> Result<(String, u16)> {
    let rest = target.strip_prefix("http://").ok_or_else(|| {
        Error::protocol(format!("expected absolute-form request target: {}", target))
    })?;
    let authority = match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    split_host_port(authority, 80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:8443", 443).unwrap(),
            ("example.com".to_string(), 8443)
        );
        assert_eq!(
            split_host_port("example.com", 443).unwrap(),
            ("example.com".to_string(), 443)
        );
        assert!(split_host_port("example.com:http", 443).is_err());
    }

    #[test]
    fn test_parse_absolute_form() {
        assert_eq!(
            parse_absolute_form("http://example.com/index.html").unwrap(),
            ("example.com".to_string(), 80)
        );
        assert_eq!(
            parse_absolute_form("http://example.com:8080/api?q=1").unwrap(),
            ("example.com".to_string(), 8080)
        );
        assert_eq!(
            parse_absolute_form("http://example.com").unwrap(),
            ("example.com".to_string(), 80)
        );
        assert!(parse_absolute_form("https://example.com/").is_err());
        assert!(parse_absolute_form("/index.html").is_err());
    }
}
