//! SOCKS5-encoded target addresses.
//!
//! The destination extracted from a client handshake travels as
//! `ATYP(1) | addr | PORT(2)` octets. The exact on-wire encoding is kept
//! verbatim because it is also the first plaintext payload sent to the
//! upstream server.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Address type: IPv4, 4 bytes
pub const ATYP_IPV4: u8 = 0x01;
/// Address type: domain name, length-prefixed
pub const ATYP_DOMAIN: u8 = 0x03;
/// Address type: IPv6, 16 bytes
pub const ATYP_IPV6: u8 = 0x04;

/// A destination in SOCKS5 address encoding.
///
/// Holds the validated `ATYP | addr | PORT` octets; `as_bytes` returns them
/// unchanged for the upstream handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    bytes: Vec<u8>,
}

impl TargetAddr {
    /// Encode a host (IP literal or domain name) and port.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip, port));
        }

        let name = host.as_bytes();
        if name.is_empty() {
            return Err(Error::InvalidMessage("empty domain name".into()));
        }
        if name.len() > 255 {
            return Err(Error::InvalidMessage(format!(
                "domain name too long: {} bytes",
                name.len()
            )));
        }

        let mut bytes = Vec::with_capacity(4 + name.len());
        bytes.push(ATYP_DOMAIN);
        bytes.push(name.len() as u8);
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(&port.to_be_bytes());
        Ok(Self { bytes })
    }

    /// Encode an IP address and port.
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        let mut bytes = Vec::with_capacity(19);
        match ip {
            IpAddr::V4(v4) => {
                bytes.push(ATYP_IPV4);
                bytes.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                bytes.push(ATYP_IPV6);
                bytes.extend_from_slice(&v6.octets());
            }
        }
        bytes.extend_from_slice(&port.to_be_bytes());
        Self { bytes }
    }

    /// Encode a socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }

    /// Read `ATYP | addr | PORT` from a stream (the tail of a SOCKS5
    /// request), retaining the on-wire octets verbatim.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let atyp = reader.read_u8().await?;
        let mut bytes = vec![atyp];

        match atyp {
            ATYP_IPV4 => {
                let mut rest = [0u8; 6];
                reader.read_exact(&mut rest).await?;
                bytes.extend_from_slice(&rest);
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await?;
                if len == 0 {
                    return Err(Error::InvalidMessage("empty domain name".into()));
                }
                bytes.push(len);
                let mut rest = vec![0u8; len as usize + 2];
                reader.read_exact(&mut rest).await?;
                bytes.extend_from_slice(&rest);
            }
            ATYP_IPV6 => {
                let mut rest = [0u8; 18];
                reader.read_exact(&mut rest).await?;
                bytes.extend_from_slice(&rest);
            }
            other => {
                return Err(Error::InvalidMessage(format!(
                    "unsupported address type: {:#04x}",
                    other
                )));
            }
        }

        Ok(Self { bytes })
    }

    /// The raw SOCKS5 address octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The destination port.
    pub fn port(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// The destination host as a string (for logging only).
    pub fn host(&self) -> String {
        match self.bytes[0] {
            ATYP_IPV4 => {
                let octets: [u8; 4] = self.bytes[1..5].try_into().unwrap_or_default();
                IpAddr::from(octets).to_string()
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] = self.bytes[1..17].try_into().unwrap_or_default();
                IpAddr::from(octets).to_string()
            }
            _ => {
                let len = self.bytes[1] as usize;
                String::from_utf8_lossy(&self.bytes[2..2 + len]).into_owned()
            }
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bytes[0] == ATYP_IPV6 {
            write!(f, "[{}]:{}", self.host(), self.port())
        } else {
            write!(f, "{}:{}", self.host(), self.port())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_domain_encoding() {
        let addr = TargetAddr::from_host_port("example.com", 80).unwrap();
        let mut expected = vec![0x03, 0x0b];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x00, 0x50]);
        assert_eq!(addr.as_bytes(), expected.as_slice());
        assert_eq!(addr.to_string(), "example.com:80");
    }

    #[test]
    fn test_ipv4_encoding() {
        let addr = TargetAddr::from_host_port("10.1.2.3", 8388).unwrap();
        assert_eq!(
            addr.as_bytes(),
            &[0x01, 10, 1, 2, 3, (8388u16 >> 8) as u8, (8388u16 & 0xff) as u8]
        );
        assert_eq!(addr.to_string(), "10.1.2.3:8388");
    }

    #[test]
    fn test_ipv6_encoding() {
        let addr = TargetAddr::from_host_port("::1", 443).unwrap();
        let mut expected = vec![0x04];
        expected.extend_from_slice(&[0u8; 15]);
        expected.push(1);
        expected.extend_from_slice(&[0x01, 0xbb]);
        assert_eq!(addr.as_bytes(), expected.as_slice());
        assert_eq!(addr.to_string(), "[::1]:443");
    }

    #[test]
    fn test_domain_too_long() {
        let long = "a".repeat(256);
        assert!(TargetAddr::from_host_port(&long, 80).is_err());
    }

    #[tokio::test]
    async fn test_read_from_preserves_wire_bytes() {
        let mut wire = vec![0x03, 0x0e];
        wire.extend_from_slice(b"api.github.com");
        wire.extend_from_slice(&[0x01, 0xbb]);

        let mut cursor = Cursor::new(wire.clone());
        let addr = TargetAddr::read_from(&mut cursor).await.unwrap();
        assert_eq!(addr.as_bytes(), wire.as_slice());
        assert_eq!(addr.host(), "api.github.com");
        assert_eq!(addr.port(), 443);
    }

    #[tokio::test]
    async fn test_read_from_rejects_unknown_atyp() {
        let mut cursor = Cursor::new(vec![0x02, 0x00, 0x00]);
        assert!(TargetAddr::read_from(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_read_from_ipv4() {
        let wire = vec![0x01, 127, 0, 0, 1, 0x1f, 0x90];
        let mut cursor = Cursor::new(wire.clone());
        let addr = TargetAddr::read_from(&mut cursor).await.unwrap();
        assert_eq!(addr.as_bytes(), wire.as_slice());
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }
}
