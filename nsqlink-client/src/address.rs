//! Remote endpoint address.

use crate::error::ClientError;
use std::fmt;
use std::str::FromStr;

/// Host and port of an nsqd instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClientError::InvalidAddress(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ClientError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ClientError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for ServerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: ServerAddress = "nsqd.internal:4150".parse().unwrap();
        assert_eq!(addr.host(), "nsqd.internal");
        assert_eq!(addr.port(), 4150);
        assert_eq!(addr.to_string(), "nsqd.internal:4150");
    }

    #[test]
    fn test_ipv6() {
        let addr: ServerAddress = "[::1]:4150".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:4150");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!("localhost".parse::<ServerAddress>().is_err());
        assert!(":4150".parse::<ServerAddress>().is_err());
        assert!("localhost:http".parse::<ServerAddress>().is_err());
        assert!("localhost:70000".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let addr = ServerAddress::from("127.0.0.1:4150".parse::<std::net::SocketAddr>().unwrap());
        assert_eq!(addr, ServerAddress::new("127.0.0.1", 4150));
    }
}
