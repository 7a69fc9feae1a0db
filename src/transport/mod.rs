//! Byte channel layer under the SMB transport
//!
//! A [`Channel`] moves whole SMB messages over one connection, hiding the
//! NetBIOS session framing. A [`Connector`] opens channels; the default
//! [`tcp::TcpConnector`] speaks direct-hosted SMB on 445 and NetBIOS session
//! service on 139.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::resolver::Address;
use async_trait::async_trait;
use std::net::SocketAddr;

pub mod tcp;

pub use tcp::{TcpChannel, TcpConnector};

/// Framed connection to one server
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one complete SMB message
    async fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Receive the next SMB message, skipping keep-alives
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// The peer closed or an I/O error broke the connection
    fn is_closed(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Get the remote address
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Opens channels for transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &Address,
        port: u16,
        config: &ClientConfig,
    ) -> Result<Box<dyn Channel>>;
}
