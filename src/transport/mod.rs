//! Transport layer for Firebird connections
//!
//! A transport owns one byte stream to the server and a receive buffer.
//! Protocol messages have no length header, so framing is done by decoding:
//! [`receive`] runs a decoder over the buffered bytes and reads more from the
//! socket whenever the decoder runs out of input.

mod stream;

pub use stream::{StreamTransport, TcpTransport};

use crate::buffer::ReadBuffer;
use crate::error::{Error, Result};

/// Trait for transport implementations
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the server
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever the socket has into the receive buffer
    ///
    /// Returns the number of bytes added. End of stream is reported as
    /// [`Error::ConnectionClosed`]. Cancelling the returned future loses no data.
    async fn fill(&mut self) -> Result<usize>;

    /// Bytes received but not yet consumed
    fn buffered(&self) -> &[u8];

    /// Discard `n` bytes from the front of the receive buffer
    fn consume(&mut self, n: usize);

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Receive one complete message using `decode`
///
/// The decoder always starts from the first unconsumed byte. If it fails with
/// [`Error::BufferUnderflow`] more data is read and it runs again; on success
/// exactly the bytes it read are consumed.
pub async fn receive<T, F>(transport: &mut (dyn Transport + '_), mut decode: F) -> Result<T>
where
    F: FnMut(&mut ReadBuffer) -> Result<T> + Send,
{
    loop {
        if !transport.buffered().is_empty() {
            let mut buf = ReadBuffer::from_slice(transport.buffered());
            match decode(&mut buf) {
                Ok(message) => {
                    transport.consume(buf.position());
                    return Ok(message);
                }
                Err(Error::BufferUnderflow { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        transport.fill().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_receive_waits_for_complete_message() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);

        let reader = tokio::spawn(async move {
            let value = receive(&mut transport, |buf| {
                let op = buf.read_u32()?;
                let text = buf.read_string()?;
                Ok((op, text))
            })
            .await
            .unwrap();
            (value, transport.buffered().to_vec())
        });

        // Message split across three writes, followed by the next message
        server.write_all(&[0, 0, 0, 9, 0, 0]).await.unwrap();
        server.write_all(&[0, 5, b'h', b'e', b'l']).await.unwrap();
        server
            .write_all(&[b'l', b'o', 0, 0, 0, 0, 0, 0, 0x47])
            .await
            .unwrap();

        let ((op, text), rest) = reader.await.unwrap();
        assert_eq!(op, 9);
        assert_eq!(text, "hello");
        assert_eq!(rest, vec![0, 0, 0, 0x47]);
    }

    #[tokio::test]
    async fn test_receive_rejects_corrupt_length() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        server.write_all(&[0x7F, 0, 0, 0, b'x']).await.unwrap();

        let err = receive(&mut transport, |buf| buf.read_opaque()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        drop(server);
    }

    #[tokio::test]
    async fn test_receive_reports_closed_stream() {
        let (client, server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        drop(server);
        let err = receive(&mut transport, |buf| buf.read_u32()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(!transport.is_connected());
    }
}
