//! Full-duplex tunnel relay with a cipher transform on each leg
//!
//! One task drives both directions of a tunnel through a readiness loop, so
//! each cipher session is used from exactly one place and the byte-stream
//! order the stateful cipher requires is preserved.

use crate::crypto::{EgressCipher, IngressCipher};
use crate::statistic::StatisticManager;
use crate::Result;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const RELAY_BUF_SIZE: usize = 4096;

/// Which endpoint runs this relay. Decides the accounting convention: the
/// local endpoint counts emitted ciphertext (IV included) as outbound and
/// decrypted plaintext as inbound; the server endpoint counts plaintext on
/// both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Local,
    Server,
}

/// Shuttle bytes between the plaintext-side socket (user application or
/// origin) and the ciphertext-side socket (tunnel peer) until both
/// directions have seen EOF, any write or transform fails, or the tunnel
/// sits idle past `idle_timeout`.
///
/// EOF on one leg shuts down the opposite write half and retires that leg;
/// the surviving direction keeps draining. Partial writes are retried until
/// the whole transformed chunk is on the wire.
#[allow(clippy::too_many_arguments)]
pub async fn relay(
    plain: &mut TcpStream,
    cipher: &mut TcpStream,
    mut egress: EgressCipher,
    mut ingress: IngressCipher,
    endpoint: Endpoint,
    conn_id: &str,
    statistic: &StatisticManager,
    idle_timeout: Duration,
) -> Result<()> {
    let (mut plain_rd, mut plain_wr) = plain.split();
    let (mut cipher_rd, mut cipher_wr) = cipher.split();

    let mut plain_buf = vec![0u8; RELAY_BUF_SIZE];
    let mut cipher_buf = vec![0u8; RELAY_BUF_SIZE];
    let mut plain_open = true;
    let mut cipher_open = true;

    let idle = sleep(idle_timeout);
    tokio::pin!(idle);

    while plain_open || cipher_open {
        tokio::select! {
            res = plain_rd.read(&mut plain_buf), if plain_open => {
                let n = res?;
                if n == 0 {
                    plain_open = false;
                    let _ = cipher_wr.shutdown().await;
                    continue;
                }
                let out = egress.encrypt(&plain_buf[..n]);
                cipher_wr.write_all(&out).await?;
                let sent = match endpoint {
                    Endpoint::Local => out.len(),
                    Endpoint::Server => n,
                };
                statistic.update(conn_id, 0, sent as u64);
                idle.as_mut().reset(Instant::now() + idle_timeout);
            }
            res = cipher_rd.read(&mut cipher_buf), if cipher_open => {
                let n = res?;
                if n == 0 {
                    if ingress.awaiting_iv() && ingress.iv_bytes_seen() > 0 {
                        warn!(
                            "[{}] peer stream ended inside the IV ({} of 16 bytes)",
                            conn_id,
                            ingress.iv_bytes_seen()
                        );
                    }
                    cipher_open = false;
                    let _ = plain_wr.shutdown().await;
                    continue;
                }
                let out = ingress.decrypt(&cipher_buf[..n]);
                if !out.is_empty() {
                    plain_wr.write_all(&out).await?;
                    statistic.update(conn_id, out.len() as u64, 0);
                }
                idle.as_mut().reset(Instant::now() + idle_timeout);
            }
            _ = &mut idle => {
                debug!("[{}] idle timeout, closing tunnel", conn_id);
                break;
            }
        }
    }

    Ok(())
}
