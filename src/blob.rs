//! Blob streaming
//!
//! Blob columns come back from queries as [`BlobId`]s. Reading one means
//! opening it in a transaction and pulling segments until the server reports
//! the end; writing means creating a blob, sending segments and closing it,
//! after which its id can be stored in a row.
//!
//! A [`BlobHandle`] is only valid inside the transaction it was opened in and
//! until it is closed or cancelled.

use crate::connection::Connection;
use crate::constants::{segment, MAX_SEGMENT_SIZE};
use crate::error::{Error, Result};
use crate::handles::{BlobMode, Handle, HandleKind};
use crate::messages::{
    parse_segments, BatchSegmentsMessage, BlobMessage, CreateBlobMessage, GetSegmentMessage,
    OpenBlobMessage, Request,
};
use crate::transaction::Transaction;
use crate::types::BlobId;

/// Data returned by one [`BlobHandle::get_segment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSegment {
    /// Segment bytes, possibly several server segments joined in order
    pub data: Vec<u8>,
    /// `false` once the server has no more data for this blob
    pub more: bool,
}

/// An open blob
#[derive(Debug, Clone)]
pub struct BlobHandle {
    conn: Connection,
    handle: Handle,
    blob_id: BlobId,
    mode: BlobMode,
}

impl BlobHandle {
    /// Open `blob_id` for reading in `tx`
    pub(crate) async fn open(tx: &Transaction, blob_id: BlobId) -> Result<Self> {
        tx.check_live()?;
        let conn = tx.connection().clone();
        let payload = OpenBlobMessage::new(tx.handle().id(), blob_id).build_request();
        let response = conn.request(Request::response(payload)).await?.into_response()?;
        let handle = conn.registry().register_blob(response.handle, tx.handle(), BlobMode::Read);
        tracing::trace!(handle = response.handle, blob = %blob_id, "blob opened");
        Ok(Self {
            conn,
            handle,
            blob_id,
            mode: BlobMode::Read,
        })
    }

    /// Create a new blob for writing in `tx`
    pub(crate) async fn create(tx: &Transaction) -> Result<Self> {
        tx.check_live()?;
        let conn = tx.connection().clone();
        let payload = CreateBlobMessage::new(tx.handle().id()).build_request()?;
        let response = conn.request(Request::response(payload)).await?.into_response()?;
        let blob_id = response.blob_id;
        let handle = conn.registry().register_blob(response.handle, tx.handle(), BlobMode::Write);
        tracing::trace!(handle = response.handle, blob = %blob_id, "blob created");
        Ok(Self {
            conn,
            handle,
            blob_id,
            mode: BlobMode::Write,
        })
    }

    /// Id of the blob
    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    /// Whether the blob was opened for reading or created for writing
    pub fn mode(&self) -> BlobMode {
        self.mode
    }

    /// Whether the handle is still live
    pub fn is_open(&self) -> bool {
        self.conn.registry().blob(self.handle).is_ok()
    }

    fn check(&self, mode: BlobMode) -> Result<()> {
        let entry = self.conn.registry().blob(self.handle)?;
        if entry.mode != mode {
            return Err(Error::InvalidHandle {
                kind: HandleKind::Blob,
                handle: self.handle.id(),
            });
        }
        Ok(())
    }

    /// Read the next segment(s)
    pub async fn get_segment(&self) -> Result<BlobSegment> {
        self.check(BlobMode::Read)?;
        let payload = GetSegmentMessage::new(self.handle.id(), MAX_SEGMENT_SIZE).build_request();
        let response = self
            .conn
            .request(Request::response(payload))
            .await?
            .into_response()?;
        // The handle word carries the segment state
        Ok(BlobSegment {
            data: parse_segments(&response.data)?,
            more: response.handle != segment::EOF,
        })
    }

    /// Read everything left in the blob
    pub async fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let segment = self.get_segment().await?;
            data.extend_from_slice(&segment.data);
            if !segment.more {
                return Ok(data);
            }
        }
    }

    /// Append `data`, split into segments of the configured size
    pub async fn put(&self, data: &[u8]) -> Result<()> {
        self.check(BlobMode::Write)?;
        let segment_size = self.conn.config().blob_segment_size;
        let mut pending = Vec::new();
        for message in BatchSegmentsMessage::split(self.handle.id(), data, segment_size) {
            pending.push(self.conn.request(Request::response(message.build_request()?)));
        }
        let requests = pending.len();
        let mut first_error = None;
        for reply in pending {
            if let Err(e) = reply.await.and_then(|r| r.into_response()) {
                first_error.get_or_insert(e);
            }
        }
        tracing::trace!(
            handle = self.handle.id(),
            bytes = data.len(),
            requests = requests,
            "blob segments sent"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the blob and return its id
    ///
    /// For a written blob the id becomes usable as a column value.
    pub async fn close(&self) -> Result<BlobId> {
        self.release(BlobMessage::close(self.handle.id())).await?;
        Ok(self.blob_id)
    }

    /// Abandon a blob; written data is discarded
    pub async fn cancel(&self) -> Result<()> {
        self.release(BlobMessage::cancel(self.handle.id())).await
    }

    async fn release(&self, message: BlobMessage) -> Result<()> {
        self.conn.registry().blob(self.handle)?;
        let reply = self.conn.request(Request::response(message.build_request())).await;
        if !matches!(&reply, Err(e) if e.is_fatal()) {
            let _ = self.conn.registry().release_blob(self.handle);
        }
        reply?.into_response()?;
        Ok(())
    }
}
