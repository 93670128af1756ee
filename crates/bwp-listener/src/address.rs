//! Listen address parsing
//!
//! An address beginning with `/` is a Unix-domain socket path. Anything
//! else is an IPv4 `host:port`; an empty host (`:8080`) means all
//! interfaces.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::path::PathBuf;

use crate::{ListenerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenAddress {
    Unix(PathBuf),
    Tcp(SocketAddrV4),
}

impl ListenAddress {
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| ListenerError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if address.starts_with('/') {
            return Ok(ListenAddress::Unix(PathBuf::from(address)));
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        if host.is_empty() {
            return Ok(ListenAddress::Tcp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));
        }
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ListenAddress::Tcp(SocketAddrV4::new(ip, port)));
        }

        // hostname: first IPv4 result wins
        (host, port)
            .to_socket_addrs()
            .map_err(|e| invalid(&e.to_string()))?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(ListenAddress::Tcp(v4)),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| invalid("host has no IPv4 address"))
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, ListenAddress::Unix(_))
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::Unix(path) => write!(f, "{}", path.display()),
            ListenAddress::Tcp(addr) => write!(f, "{}", addr),
        }
    }
}
