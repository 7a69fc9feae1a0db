//! TCP channel for SMB

use super::{Channel, Connector};
use crate::config::{ClientConfig, NETBIOS_PORT};
use crate::error::{Error, Result};
use crate::netbios::name::called_names;
use crate::netbios::{NetBiosHeader, NetBiosMessage, NetBiosMessageType};
use crate::resolver::Address;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// TCP channel with NetBIOS session framing
pub struct TcpChannel {
    stream: Option<TcpStream>,
    read_buffer: BytesMut,
    remote_addr: Option<SocketAddr>,
    closed: bool,
}

impl TcpChannel {
    /// Create a channel from an existing stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);

        Self {
            stream: Some(stream),
            read_buffer: BytesMut::with_capacity(65536),
            remote_addr,
            closed: false,
        }
    }

    /// Open a TCP connection within `connect_timeout`
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        trace!("Connecting to {}", addr);
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(Self::from_stream(stream))
    }

    /// NetBIOS session request, required before SMB traffic on port 139
    pub async fn session_request(&mut self, called_name: &str, calling_name: &str) -> Result<()> {
        let request = NetBiosMessage::session_request(called_name, calling_name)?;
        self.write_all(&request.to_bytes()).await?;

        let response = self.read_frame().await?;
        response.check_session_response()
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = async {
            stream.write_all(data).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = result {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<NetBiosMessage> {
        while self.read_buffer.len() < NetBiosHeader::SIZE {
            self.read_more().await?;
        }

        let header = NetBiosHeader::parse(&self.read_buffer)?;
        let total_size = NetBiosHeader::SIZE + header.length as usize;

        while self.read_buffer.len() < total_size {
            self.read_more().await?;
        }

        let frame = self.read_buffer.split_to(total_size);
        NetBiosMessage::parse(&frame)
    }

    /// Read more data from the stream into the buffer
    async fn read_more(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let mut temp_buf = [0u8; 8192];
        let n = match stream.read(&mut temp_buf).await {
            Ok(n) => n,
            Err(e) => {
                self.closed = true;
                return Err(e.into());
            }
        };
        if n == 0 {
            self.closed = true;
            return Err(Error::ConnectionClosed);
        }
        self.read_buffer.put_slice(&temp_buf[..n]);
        Ok(n)
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        let frame = NetBiosMessage::session_message(message.to_vec())?;
        self.write_all(&frame.to_bytes()).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            let frame = self.read_frame().await?;
            match frame.header.message_type {
                NetBiosMessageType::SessionMessage => return Ok(frame.payload),
                NetBiosMessageType::Keepalive => trace!("Skipping NetBIOS keep-alive"),
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected NetBIOS message type: {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || self.stream.is_none()
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.read_buffer.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Opens [`TcpChannel`]s; port 139 gets a NetBIOS session request
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &Address,
        port: u16,
        config: &ClientConfig,
    ) -> Result<Box<dyn Channel>> {
        let addr = address.socket_addr(port);
        if port != NETBIOS_PORT {
            return Ok(Box::new(TcpChannel::connect(addr, config.conn_timeout).await?));
        }

        let mut last_error = None;
        for called in called_names(address.host_name()) {
            let mut channel = TcpChannel::connect(addr, config.conn_timeout).await?;
            match timeout(
                config.conn_timeout,
                channel.session_request(&called, &config.local_name),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!("NetBIOS session established with {} as {}", addr, called);
                    return Ok(Box::new(channel));
                }
                Ok(Err(e)) => {
                    debug!("NetBIOS session request as {} failed: {}", called, e);
                    last_error = Some(e);
                }
                Err(_) => last_error = Some(Error::Timeout),
            }
            let _ = channel.close().await;
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Transport(format!("No NetBIOS name accepted by {}", addr))
        }))
    }
}
