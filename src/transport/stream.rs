//! Stream transport implementation
//!
//! Works over any async byte stream; TCP is the production case, in-memory
//! duplex streams are used by the test server.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

use super::Transport;

const READ_CHUNK: usize = 8192;

/// Transport over a bidirectional async byte stream
pub struct StreamTransport<S> {
    /// The underlying stream, `None` once closed
    stream: Option<S>,
    /// Received bytes not yet consumed by a decoder
    read_buf: BytesMut,
}

/// TCP transport for Firebird connections
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

impl StreamTransport<TcpStream> {
    /// Connect to `addr` (`host:port`) within `connect_timeout`
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout(connect_timeout))?
            .map_err(Error::Io)?;

        // Requests are small and strictly alternating with responses
        stream.set_nodelay(true).map_err(Error::Io)?;

        tracing::debug!(addr = addr, "TCP connection established");
        Ok(Self::new(stream))
    }
}

#[async_trait::async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data).await.map_err(Error::Io)?;
        stream.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    async fn fill(&mut self) -> Result<usize> {
        self.read_buf.reserve(READ_CHUNK);
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let n = stream.read_buf(&mut self.read_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ConnectionClosed
            } else {
                Error::Io(e)
            }
        })?;
        if n == 0 {
            self.stream = None;
            return Err(Error::ConnectionClosed);
        }
        Ok(n)
    }

    fn buffered(&self) -> &[u8] {
        &self.read_buf
    }

    fn consume(&mut self, n: usize) {
        self.read_buf.advance(n.min(self.read_buf.len()));
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.map_err(Error::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_fill() {
        let (client, server) = tokio::io::duplex(64);
        let mut a = StreamTransport::new(client);
        let mut b = StreamTransport::new(server);
        assert!(a.is_connected());

        a.send(&[1, 2, 3, 4]).await.unwrap();
        let mut total = 0;
        while total < 4 {
            total += b.fill().await.unwrap();
        }
        assert_eq!(b.buffered(), &[1, 2, 3, 4]);
        b.consume(3);
        assert_eq!(b.buffered(), &[4]);
    }

    #[tokio::test]
    async fn test_close() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(&[0]).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
