//! SOCKS5 wire constants and the pieces of the dialogue the front-end speaks
//!
//! Only the no-auth CONNECT dialogue is implemented; everything else is
//! answered with the matching failure reply and the connection is closed.

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;

// Commands
pub const CMD_CONNECT: u8 = 0x01;

// Address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// Reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Read and discard the client greeting (`ver, nmethods, methods...`).
/// Offered methods are ignored; this front-end always selects no-auth.
pub async fn read_greeting<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    if head[0] != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "unsupported SOCKS version: {}",
            head[0]
        )));
    }

    let mut methods = [0u8; 255];
    reader.read_exact(&mut methods[..head[1] as usize]).await?;
    Ok(())
}

/// Answer the greeting: no authentication required.
pub async fn write_method_reply<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
    Ok(())
}

/// Write a request reply with a zeroed IPv4 bound address.
pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, rep: u8) -> Result<()> {
    writer
        .write_all(&[SOCKS5_VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_method_reply_bytes() {
        let mut buf = std::io::Cursor::new(Vec::new());
        write_method_reply(&mut buf).await.unwrap();
        assert_eq!(buf.into_inner(), [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_success_reply_bytes() {
        let mut buf = std::io::Cursor::new(Vec::new());
        write_reply(&mut buf, REP_SUCCEEDED).await.unwrap();
        assert_eq!(buf.into_inner(), [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_greeting_rejects_wrong_version() {
        let mut input = std::io::Cursor::new(vec![0x04u8, 0x01, 0x00]);
        let err = read_greeting(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_greeting_consumes_methods() {
        let mut input = std::io::Cursor::new(vec![0x05u8, 0x02, 0x00, 0x02]);
        read_greeting(&mut input).await.unwrap();
        assert_eq!(input.position(), 4);
    }
}
