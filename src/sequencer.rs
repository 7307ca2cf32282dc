//! Request sequencing
//!
//! The wire protocol has no request ids: the only way to pair a reply with
//! its request is order. Every connection therefore funnels its requests
//! through one FIFO channel drained by a single driver task that owns the
//! transport. The driver sends a request, reads its complete reply, hands it
//! to the waiting caller and only then looks at the next request.
//!
//! Enqueueing is synchronous: the request has its place in the queue when
//! [`Sequencer::enqueue`] returns, before the returned future is polled.
//!
//! A request that expects no reply (`op_disconnect`) is the last one: the
//! driver closes the transport after sending it.
//!
//! On a transport or protocol failure the request being served gets the
//! error, everything still queued gets [`Error::ConnectionClosed`] in queue
//! order, the queue is closed and one `error` event is emitted.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::events::Events;
use crate::messages::{decode_reply, Expect, Reply, Request};
use crate::transport::{receive, Transport};

struct Job {
    request: Request,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Handle to a connection's driver task
#[derive(Debug, Clone)]
pub(crate) struct Sequencer {
    queue: mpsc::UnboundedSender<Job>,
    id: u32,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("op", &self.request.op_code()).finish()
    }
}

impl Sequencer {
    /// Start the driver task for `transport`
    pub(crate) fn spawn(
        transport: Box<dyn Transport>,
        events: Events,
        request_timeout: Option<Duration>,
        id: u32,
    ) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let driver = Driver {
            transport,
            jobs,
            events,
            request_timeout,
            id,
        };
        tokio::spawn(driver.run());
        Self { queue, id }
    }

    /// Queue `request`; the returned future resolves with its reply
    pub(crate) fn enqueue(&self, request: Request) -> impl Future<Output = Result<Reply>> + Send {
        let (reply, rx) = oneshot::channel();
        let queued = self.queue.send(Job { request, reply }).is_ok();
        let id = self.id;
        async move {
            if !queued {
                tracing::debug!(connection = id, "request rejected, connection closed");
                return Err(Error::ConnectionClosed);
            }
            rx.await.unwrap_or(Err(Error::ConnectionClosed))
        }
    }

    /// Whether the driver has stopped accepting requests
    pub(crate) fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

struct Driver {
    transport: Box<dyn Transport>,
    jobs: mpsc::UnboundedReceiver<Job>,
    events: Events,
    request_timeout: Option<Duration>,
    id: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let job = tokio::select! {
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                // Idle: a read here only sees keep-alives or the peer going away
                filled = self.transport.fill(), if self.transport.is_connected() => {
                    if let Err(e) = filled {
                        tracing::warn!(connection = self.id, error = %e, "connection lost while idle");
                        self.fail(e, None).await;
                        return;
                    }
                    continue;
                }
            };

            let op = job.request.op_code();
            tracing::trace!(
                connection = self.id,
                op = op,
                bytes = job.request.payload.len(),
                "sending request"
            );
            let last = matches!(job.request.expect, Expect::Nothing);
            match self.exchange(&job.request).await {
                Ok(reply) if last => {
                    let _ = job.reply.send(Ok(reply));
                    self.shutdown().await;
                    return;
                }
                Ok(reply) => {
                    tracing::trace!(connection = self.id, op = op, "reply received");
                    // The caller may have stopped waiting
                    let _ = job.reply.send(Ok(reply));
                }
                Err(e) if e.is_fatal() => {
                    tracing::warn!(connection = self.id, op = op, error = %e, "connection failed");
                    self.fail(e, Some(job)).await;
                    return;
                }
                Err(e) => {
                    let _ = job.reply.send(Err(e));
                }
            }
        }

        // Every Sequencer handle is gone
        if let Err(e) = self.transport.close().await {
            tracing::debug!(connection = self.id, error = %e, "error closing transport");
        }
        tracing::debug!(connection = self.id, "driver stopped");
    }

    async fn exchange(&mut self, request: &Request) -> Result<Reply> {
        let transport = &mut *self.transport;
        let io = async move {
            transport.send(&request.payload).await?;
            if matches!(request.expect, Expect::Nothing) {
                return Ok(Reply::Nothing);
            }
            receive(transport, |buf| decode_reply(buf, &request.expect)).await
        };
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, io)
                .await
                .map_err(|_| Error::RequestTimeout(limit))?,
            None => io.await,
        }
    }

    /// Stop after `op_disconnect`; nothing can follow it on this socket
    async fn shutdown(&mut self) {
        self.jobs.close();
        if let Err(e) = self.transport.close().await {
            tracing::debug!(connection = self.id, error = %e, "error closing transport");
        }
        while let Ok(job) = self.jobs.try_recv() {
            let _ = job.reply.send(Err(Error::ConnectionClosed));
        }
        tracing::debug!(connection = self.id, "disconnected");
    }

    /// Tear the connection down after a fatal error
    async fn fail(&mut self, error: Error, head: Option<Job>) {
        self.jobs.close();
        if let Err(e) = self.transport.close().await {
            tracing::debug!(connection = self.id, error = %e, "error closing transport");
        }
        self.events.emit_error(&error);
        if let Some(job) = head {
            let _ = job.reply.send(Err(error));
        }
        let mut failed = 0usize;
        while let Ok(job) = self.jobs.try_recv() {
            failed += 1;
            let _ = job.reply.send(Err(Error::ConnectionClosed));
        }
        if failed > 0 {
            tracing::debug!(connection = self.id, failed = failed, "failed queued requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteBuffer;
    use crate::constants::{isc_arg, Operation};
    use crate::transport::StreamTransport;
    use crate::types::BlobId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn ok_response(handle: u32) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        buf.write_u32(Operation::Response as u32);
        buf.write_u32(handle);
        buf.write_quad(BlobId::default());
        buf.write_opaque(&[]).unwrap();
        buf.write_u32(isc_arg::GDS);
        buf.write_u32(0);
        buf.write_u32(isc_arg::END);
        buf.as_slice().to_vec()
    }

    fn request(word: u32) -> Request {
        let mut buf = WriteBuffer::new();
        buf.write_u32(word);
        Request::response(buf.freeze())
    }

    async fn read_word(server: &mut DuplexStream) -> u32 {
        let mut word = [0u8; 4];
        server.read_exact(&mut word).await.unwrap();
        u32::from_be_bytes(word)
    }

    fn spawn(events: Events) -> (Sequencer, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let sequencer =
            Sequencer::spawn(Box::new(StreamTransport::new(client)), events, None, 1);
        (sequencer, server)
    }

    #[tokio::test]
    async fn test_requests_are_served_in_enqueue_order() {
        let (sequencer, mut server) = spawn(Events::new());
        let first = sequencer.enqueue(request(101));
        let second = sequencer.enqueue(request(102));

        assert_eq!(read_word(&mut server).await, 101);
        server.write_all(&ok_response(1)).await.unwrap();
        // The second request is only sent after the first reply
        assert_eq!(read_word(&mut server).await, 102);
        server.write_all(&ok_response(2)).await.unwrap();

        let second = second.await.unwrap().into_response().unwrap();
        let first = first.await.unwrap().into_response().unwrap();
        assert_eq!((first.handle, second.handle), (1, 2));
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let (sequencer, mut server) = spawn(Events::new());
        let pending = sequencer.enqueue(request(7));
        assert_eq!(read_word(&mut server).await, 7);

        let reply = ok_response(9);
        let (a, b) = reply.split_at(10);
        server.write_all(a).await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(b).await.unwrap();

        assert_eq!(pending.await.unwrap().into_response().unwrap().handle, 9);
    }

    #[tokio::test]
    async fn test_closure_fails_queue_in_order_and_emits_one_error() {
        let events = Events::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        events.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (sequencer, mut server) = spawn(events);

        let head = sequencer.enqueue(request(1));
        let queued = sequencer.enqueue(request(2));
        assert_eq!(read_word(&mut server).await, 1);
        drop(server);

        assert!(matches!(head.await, Err(Error::ConnectionClosed)));
        assert!(matches!(queued.await, Err(Error::ConnectionClosed)));
        assert!(matches!(
            sequencer.enqueue(request(3)).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(sequencer.is_closed());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_disconnect_emits_error() {
        let events = Events::new();
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        events.on_error(move |e| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(e.is_connection_error());
            }
        });
        let (sequencer, server) = spawn(events);
        drop(server);

        assert!(rx.await.unwrap());
        assert!(matches!(
            sequencer.enqueue(request(1)).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_closes_connection() {
        let (client, mut server) = tokio::io::duplex(4096);
        let sequencer = Sequencer::spawn(
            Box::new(StreamTransport::new(client)),
            Events::new(),
            Some(Duration::from_millis(50)),
            1,
        );
        let slow = sequencer.enqueue(request(1));
        let queued = sequencer.enqueue(request(2));
        assert_eq!(read_word(&mut server).await, 1);

        assert!(matches!(slow.await, Err(Error::RequestTimeout(_))));
        assert!(matches!(queued.await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_server_error_is_local_to_request() {
        let (sequencer, mut server) = spawn(Events::new());
        let failing = sequencer.enqueue(request(1));
        let next = sequencer.enqueue(request(2));

        assert_eq!(read_word(&mut server).await, 1);
        let mut buf = WriteBuffer::new();
        buf.write_u32(Operation::Response as u32);
        buf.write_u32(0);
        buf.write_quad(BlobId::default());
        buf.write_opaque(&[]).unwrap();
        buf.write_u32(isc_arg::GDS);
        buf.write_u32(crate::constants::gds::DSQL_ERROR);
        buf.write_u32(isc_arg::END);
        server.write_all(buf.as_slice()).await.unwrap();
        assert_eq!(read_word(&mut server).await, 2);
        server.write_all(&ok_response(5)).await.unwrap();

        let err = failing.await.unwrap().into_response().unwrap_err();
        assert_eq!(err.code(), Some(crate::constants::gds::DSQL_ERROR));
        assert_eq!(next.await.unwrap().into_response().unwrap().handle, 5);
        assert!(!sequencer.is_closed());
    }
}
