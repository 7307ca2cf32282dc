//! Blob messages
//!
//! Segment data travels inside an opaque buffer as a run of little-endian
//! u16 length-prefixed chunks, for both `op_get_segment` replies and
//! `op_batch_segments` requests.

use bytes::{Bytes, BytesMut};

use crate::buffer::WriteBuffer;
use crate::constants::{Operation, BPB_VERSION1, MAX_BATCH_BUFFER, MAX_SEGMENT_SIZE};
use crate::error::{Error, Result};
use crate::types::BlobId;

/// `op_open_blob`
#[derive(Debug)]
pub(crate) struct OpenBlobMessage {
    transaction: u32,
    blob_id: BlobId,
}

impl OpenBlobMessage {
    pub(crate) fn new(transaction: u32, blob_id: BlobId) -> Self {
        Self {
            transaction,
            blob_id,
        }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(16);
        buf.write_u32(Operation::OpenBlob as u32);
        buf.write_u32(self.transaction);
        buf.write_quad(self.blob_id);
        buf.freeze()
    }
}

/// `op_create_blob2`; the reply carries the handle and the new blob id
#[derive(Debug)]
pub(crate) struct CreateBlobMessage {
    transaction: u32,
}

impl CreateBlobMessage {
    pub(crate) fn new(transaction: u32) -> Self {
        Self { transaction }
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(24);
        buf.write_u32(Operation::CreateBlob2 as u32);
        buf.write_opaque(&[BPB_VERSION1])?;
        buf.write_u32(self.transaction);
        buf.write_quad(BlobId::default());
        Ok(buf.freeze())
    }
}

/// `op_get_segment`
#[derive(Debug)]
pub(crate) struct GetSegmentMessage {
    blob: u32,
    length: u32,
}

impl GetSegmentMessage {
    pub(crate) fn new(blob: u32, length: usize) -> Self {
        Self {
            blob,
            length: length.min(MAX_SEGMENT_SIZE) as u32,
        }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(16);
        buf.write_u32(Operation::GetSegment as u32);
        buf.write_u32(self.blob);
        buf.write_u32(self.length);
        buf.write_u32(0); // empty segment
        buf.freeze()
    }
}

/// `op_batch_segments` carrying one or more segments
#[derive(Debug)]
pub(crate) struct BatchSegmentsMessage {
    blob: u32,
    buffer: Bytes,
}

impl BatchSegmentsMessage {
    /// Pack `data` into requests of at most [`MAX_BATCH_BUFFER`] bytes,
    /// each segment at most `segment_size` bytes
    pub(crate) fn split(blob: u32, data: &[u8], segment_size: usize) -> Vec<Self> {
        // Segment plus its length prefix must fit one request
        let segment_size = segment_size.clamp(1, MAX_SEGMENT_SIZE.min(MAX_BATCH_BUFFER - 2));
        let mut messages = Vec::new();
        let mut buffer = BytesMut::new();
        for chunk in data.chunks(segment_size) {
            if !buffer.is_empty() && buffer.len() + 2 + chunk.len() > MAX_BATCH_BUFFER {
                messages.push(Self {
                    blob,
                    buffer: buffer.split().freeze(),
                });
            }
            buffer.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
            buffer.extend_from_slice(chunk);
        }
        if !buffer.is_empty() {
            messages.push(Self {
                blob,
                buffer: buffer.freeze(),
            });
        }
        messages
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(16 + self.buffer.len());
        buf.write_u32(Operation::BatchSegments as u32);
        buf.write_u32(self.blob);
        buf.write_u32(self.buffer.len() as u32);
        buf.write_opaque(&self.buffer)?;
        Ok(buf.freeze())
    }
}

/// `op_close_blob` / `op_cancel_blob`
#[derive(Debug)]
pub(crate) struct BlobMessage {
    op: Operation,
    blob: u32,
}

impl BlobMessage {
    pub(crate) fn close(blob: u32) -> Self {
        Self {
            op: Operation::CloseBlob,
            blob,
        }
    }

    pub(crate) fn cancel(blob: u32) -> Self {
        Self {
            op: Operation::CancelBlob,
            blob,
        }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(8);
        buf.write_u32(self.op as u32);
        buf.write_u32(self.blob);
        buf.freeze()
    }
}

/// Concatenate the segments of an `op_get_segment` reply buffer
pub(crate) fn parse_segments(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(buffer.len());
    let mut rest = buffer;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Error::Protocol("truncated blob segment length".into()));
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        let segment = rest
            .get(2..2 + len)
            .ok_or_else(|| Error::Protocol("truncated blob segment".into()))?;
        out.extend_from_slice(segment);
        rest = &rest[2 + len..];
    }
    Ok(out)
}
