//! Network utilities and the tunnel address codec

use crate::common::socks::{ATYP_DOMAIN, ATYP_IPV4};
use crate::{Error, Result};
use socket2::SockRef;
use std::net::Ipv4Addr;
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_reuse_address(true);
}

/// Destination address carried in the tunnel header.
///
/// The wire format admits IPv4 and domain names only; the server resolves
/// names when it dials the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl Address {
    /// Encode as `atyp, addr bytes, port:u16be` - the first plaintext bytes
    /// of the client-to-server direction.
    pub fn encode(&self, port: u16) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self {
            Address::Ipv4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                if bytes.is_empty() {
                    return Err(Error::address("empty domain name"));
                }
                if bytes.len() > 255 {
                    return Err(Error::address("domain name too long"));
                }
                buf.push(ATYP_DOMAIN);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        Ok(buf)
    }

    /// Decode a header from the head of `buf`. Returns `Ok(None)` while the
    /// buffer does not yet hold a complete header (the stream may deliver it
    /// in pieces), `Err` when no amount of further bytes can make it valid.
    /// On success also returns how many bytes the header consumed.
    pub fn decode(buf: &[u8]) -> Result<Option<(Address, u16, usize)>> {
        let Some(&atyp) = buf.first() else {
            return Ok(None);
        };
        match atyp {
            ATYP_IPV4 => {
                if buf.len() < 7 {
                    return Ok(None);
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok(Some((Address::Ipv4(ip), port, 7)))
            }
            ATYP_DOMAIN => {
                let Some(&len) = buf.get(1) else {
                    return Ok(None);
                };
                let len = len as usize;
                if len == 0 {
                    return Err(Error::address("empty domain name"));
                }
                if buf.len() < 2 + len + 2 {
                    return Ok(None);
                }
                let domain = std::str::from_utf8(&buf[2..2 + len])
                    .map_err(|_| Error::address("domain name is not UTF-8"))?
                    .to_string();
                let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
                Ok(Some((Address::Domain(domain), port, 2 + len + 2)))
            }
            t => Err(Error::address(format!("unknown address type: {}", t))),
        }
    }

    /// Encoded length including atyp and port
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    /// Host part as a dialable string
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<String> for Address {
    fn from(host: String) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        Address::Domain(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_round_trip() {
        let addr = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        let encoded = addr.encode(80).unwrap();
        assert_eq!(encoded, [0x01, 127, 0, 0, 1, 0x00, 0x50]);

        let (decoded, port, consumed) = Address::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(port, 80);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_domain_round_trip() {
        let addr = Address::Domain("example.com".to_string());
        let encoded = addr.encode(443).unwrap();
        assert_eq!(encoded[0], 0x03);
        assert_eq!(encoded[1], 11);

        let (decoded, port, consumed) = Address::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(port, 443);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_decode_incomplete_wants_more() {
        let addr = Address::Domain("example.com".to_string());
        let encoded = addr.encode(443).unwrap();
        for cut in 0..encoded.len() {
            assert!(Address::decode(&encoded[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Address::decode(&[0x04, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::Address(_)));
    }

    #[test]
    fn test_decode_rejects_empty_domain() {
        let err = Address::decode(&[0x03, 0x00, 0x00, 0x50]).unwrap_err();
        assert!(matches!(err, Error::Address(_)));
    }

    #[test]
    fn test_encode_rejects_empty_domain() {
        let addr = Address::Domain(String::new());
        assert!(addr.encode(80).is_err());
    }

    #[test]
    fn test_decode_keeps_trailing_payload() {
        let mut encoded = Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1)).encode(8080).unwrap();
        encoded.extend_from_slice(b"payload");
        let (_, _, consumed) = Address::decode(&encoded).unwrap().unwrap();
        assert_eq!(&encoded[consumed..], b"payload");
    }

    #[test]
    fn test_from_string_parses_ip() {
        assert!(matches!(Address::from("10.1.2.3".to_string()), Address::Ipv4(_)));
        assert!(matches!(
            Address::from("example.com".to_string()),
            Address::Domain(_)
        ));
    }
}
