use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Largest UDP payload; sized so oversized datagrams arrive whole instead
/// of being silently truncated to a plausible-looking block.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Datagram(Vec<u8>, SocketAddr),
    Timeout,
}

/// A bound datagram endpoint. A transfer owns exactly one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, buf: &[u8], to: SocketAddr) -> io::Result<()>;

    async fn recv_timeout(&mut self, wait: Duration) -> io::Result<Received>;
}

pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::from_socket(UdpSocket::bind(addr).await?))
    }

    /// Binds an ephemeral port in the same address family as `peer`.
    pub async fn ephemeral_for(peer: SocketAddr) -> io::Result<Self> {
        let any = if peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        Self::bind(any).await
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_timeout(&mut self, wait: Duration) -> io::Result<Received> {
        match timeout(wait, self.socket.recv_from(&mut self.buf)).await {
            Ok(res) => {
                let (n, from) = res?;
                Ok(Received::Datagram(self.buf[..n].to_vec(), from))
            }
            Err(_) => Ok(Received::Timeout),
        }
    }
}
