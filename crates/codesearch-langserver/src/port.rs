//! Ephemeral port reservation for spawned servers

use tokio::net::TcpListener;
use tracing::debug;

use crate::error::{LaunchError, Result};

/// A reserved ephemeral port.
///
/// The backing listener is held open until [`ReservedPort::release`], so two
/// reservations held at the same time can never observe the same port. The
/// listener must be released before the server process is spawned so the
/// child can bind the port itself.
pub struct ReservedPort {
    port: u16,
    _listener: TcpListener,
}

impl ReservedPort {
    /// The reserved port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Give up the reservation and hand the port to the caller
    pub fn release(self) -> u16 {
        self.port
    }
}

/// Allocates free ephemeral ports on the loopback interface
pub struct PortAllocator;

impl PortAllocator {
    /// Reserve a single ephemeral port
    pub async fn ephemeral() -> std::io::Result<ReservedPort> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        debug!(port, "reserved ephemeral port");
        Ok(ReservedPort {
            port,
            _listener: listener,
        })
    }

    /// Reserve an ephemeral port, retrying once with a fresh port on failure
    pub async fn reserve() -> Result<ReservedPort> {
        match Self::ephemeral().await {
            Ok(reserved) => Ok(reserved),
            Err(err) => {
                debug!(error = %err, "port reservation failed, retrying once");
                Self::ephemeral()
                    .await
                    .map_err(|source| LaunchError::PortAcquisitionFailed { source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_port_is_nonzero() {
        let reserved = PortAllocator::ephemeral().await.unwrap();
        assert_ne!(reserved.port(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_are_distinct() {
        let first = PortAllocator::reserve().await.unwrap();
        let second = PortAllocator::reserve().await.unwrap();
        assert_ne!(first.port(), second.port());
    }

    #[tokio::test]
    async fn test_release_returns_reserved_port() {
        let reserved = PortAllocator::reserve().await.unwrap();
        let port = reserved.port();
        assert_eq!(reserved.release(), port);
    }
}
