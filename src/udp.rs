//! ==============================================================================
//! udp.rs - datagram liveness channel
//! ==============================================================================
//!
//! purpose:
//!     remote reporters can ping the gateway over udp. every datagram is
//!     logged and answered with `ACK`; the payload is not interpreted.
//!
//! relationships:
//!     - used by: lifecycle.rs (spawned for the lifetime of the process)
//!
//! ==============================================================================

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

pub const ACK: &[u8] = b"ACK";

/// largest datagram we read; longer payloads are truncated
const MAX_DATAGRAM: usize = 1024;

pub struct UdpEcho {
    socket: UdpSocket,
}

impl UdpEcho {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind udp listener on {}", addr))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// serve until the task is aborted (which closes the socket)
    pub async fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(%addr, "UDP server running");
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "UDP receive failed");
                    continue;
                }
            };

            tracing::info!(
                %peer,
                bytes = len,
                data = %String::from_utf8_lossy(&buf[..len]),
                "Received datagram",
            );

            if let Err(e) = self.socket.send_to(ACK, peer).await {
                tracing::warn!(%peer, error = %e, "Failed to send ACK");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_datagram_gets_ack() {
        let server = UdpEcho::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 16];
        for payload in [&b"hello"[..], &b"\xff\xfe not utf8"[..]] {
            client.send_to(payload, addr).await.unwrap();
            let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
                .await
                .expect("no ACK received")
                .unwrap();
            assert_eq!(&buf[..len], ACK);
            assert_eq!(from, addr);
        }

        task.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = UdpEcho::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();
        assert!(UdpEcho::bind(addr).await.is_err());
    }
}
