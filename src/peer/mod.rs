use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

pub mod client;
pub mod server;
pub mod state;

/// Reachable address of a peer's transfer server.
///
/// The tracker builds it from the host of the inbound connection and the
/// port the peer declares in its message, since the source port of an
/// outbound connection is ephemeral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity {
    addr: SocketAddr,
}

impl PeerIdentity {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(host, port),
        }
    }

    /// Identity of a peer that connected from `remote` and serves on `port`.
    pub fn from_connection(remote: SocketAddr, port: u16) -> Self {
        Self::new(remote.ip(), port)
    }

    pub fn host(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl From<SocketAddr> for PeerIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl FromStr for PeerIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Self::from)
            .map_err(|_| Error::InvalidPeerAddress(s.to_string()))
    }
}
