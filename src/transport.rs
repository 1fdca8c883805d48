//! Connector trait for byte-stream transports

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::wire::{ACK_MAGIC, CAPABILITY_REQUEST};
use crate::{LinkError, Result};

/// Trait for transports that open a modem byte stream
///
/// The driver calls `connect` again after every transport failure, so
/// implementations must be able to produce a fresh stream each time.
#[async_trait::async_trait]
pub trait Connector: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream.
    async fn connect(&mut self) -> Result<Self::Stream>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}

/// TCP connection to the modem
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            LinkError::connection_failed_with_source(format!("connect to {}", self.addr), Box::new(e))
        })?;
        stream.set_nodelay(true)?;
        debug!("TCP connected to {}", self.addr);
        Ok(stream)
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

/// Send the capability request and wait for the modem's acknowledgement.
///
/// Only the 2-byte acknowledgement magic is consumed; anything the modem sends
/// after it is left for the frame codec, which skips it while resynchronising.
pub async fn handshake<S>(stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&CAPABILITY_REQUEST).await?;
    stream.flush().await?;
    trace!("Capability request sent");

    let mut ack = [0u8; 2];
    tokio::time::timeout(timeout, stream.read_exact(&mut ack))
        .await
        .map_err(|_| LinkError::timeout("handshake", timeout))??;

    if ack != ACK_MAGIC {
        return Err(LinkError::handshake_rejected(format!(
            "expected {:02x?}, got {:02x?}",
            ACK_MAGIC, ack
        )));
    }
    Ok(())
}
