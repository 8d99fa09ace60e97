//! Batch wire format
//!
//! Used by the network transport to deliver a batch to a downstream peer.
//!
//! ```text
//! frame:   [u32 BE payload length][payload]
//! payload: [u32 BE entry count] entry*
//! entry:   [u16 BE category length][category][u32 BE message length][message]
//! reply:   [u8 result code]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{LogEntry, MAX_CATEGORY_LENGTH, MAX_FRAME_SIZE, MessageBatch, ProtocolError, Result};

/// Bytes in the frame length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Bytes in a reply
pub const REPLY_LEN: usize = 1;

/// Bytes in the payload's entry count
pub const PAYLOAD_HEADER_LEN: usize = 4;

/// Encoded payload size for `batch`, without the frame header
pub fn payload_len(batch: &MessageBatch) -> usize {
    PAYLOAD_HEADER_LEN + batch.iter().map(|e| entry_len(e)).sum::<usize>()
}

/// Encoded size of one entry within a payload
#[inline]
pub fn entry_len(entry: &LogEntry) -> usize {
    2 + entry.category().len() + 4 + entry.len()
}

/// Check that `entry` can be encoded in a frame of its own
pub fn check_entry(entry: &LogEntry) -> Result<()> {
    if entry.category().len() > MAX_CATEGORY_LENGTH {
        return Err(ProtocolError::category_too_long(entry.category().len()));
    }
    let len = PAYLOAD_HEADER_LEN + entry_len(entry);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::overflow(len));
    }
    Ok(())
}

/// Split `batch` into consecutive runs whose payloads fit `max_payload`
///
/// Order is kept. An entry too large for `max_payload` on its own still
/// gets a run to itself; filter with [`check_entry`] first.
pub fn split_batch(batch: &MessageBatch, max_payload: usize) -> Vec<MessageBatch> {
    let mut runs = Vec::new();
    let mut current = MessageBatch::new();
    let mut current_len = PAYLOAD_HEADER_LEN;
    for entry in batch {
        let len = entry_len(entry);
        if !current.is_empty() && current_len + len > max_payload {
            runs.push(current.take());
            current_len = PAYLOAD_HEADER_LEN;
        }
        current.push_shared(entry.clone());
        current_len += len;
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Encode `batch` as a complete frame (header plus payload)
pub fn encode_frame(batch: &MessageBatch) -> Result<Bytes> {
    let len = payload_len(batch);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::overflow(len));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + len);
    buf.put_u32(len as u32);
    encode_payload(batch, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode the payload of `batch` into `buf`
pub fn encode_payload(batch: &MessageBatch, buf: &mut BytesMut) -> Result<()> {
    buf.put_u32(batch.len() as u32);
    for entry in batch {
        let category = entry.category().as_bytes();
        if category.len() > MAX_CATEGORY_LENGTH {
            return Err(ProtocolError::category_too_long(category.len()));
        }
        buf.put_u16(category.len() as u16);
        buf.put_slice(category);
        buf.put_u32(entry.len() as u32);
        buf.put_slice(entry.message());
    }
    Ok(())
}

/// Read the payload length out of a frame header
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::overflow(len));
    }
    Ok(len)
}

/// Decode a payload (frame header already stripped)
pub fn decode_payload(mut data: &[u8]) -> Result<MessageBatch> {
    let total = data.len();
    need(data, 4, total)?;
    let count = data.get_u32() as usize;

    // Every entry needs at least 6 bytes; don't trust the count for allocation
    let mut batch = MessageBatch::with_capacity(count.min(data.len() / 6));
    for _ in 0..count {
        need(data, 2, total)?;
        let cat_len = data.get_u16() as usize;
        need(data, cat_len, total)?;
        let category = std::str::from_utf8(&data[..cat_len])
            .map_err(|_| ProtocolError::InvalidCategory)?
            .to_string();
        data.advance(cat_len);

        need(data, 4, total)?;
        let msg_len = data.get_u32() as usize;
        need(data, msg_len, total)?;
        let message = Bytes::copy_from_slice(&data[..msg_len]);
        data.advance(msg_len);

        batch.push(LogEntry::new(category, message));
    }

    if !data.is_empty() {
        return Err(ProtocolError::TrailingData(data.len()));
    }
    Ok(batch)
}

#[inline]
fn need(data: &[u8], n: usize, total: usize) -> Result<()> {
    if data.len() < n {
        let consumed = total - data.len();
        return Err(ProtocolError::too_short(consumed + n, total));
    }
    Ok(())
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;
