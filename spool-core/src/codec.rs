/*!
Record framing for the backing file.

Each record is stored as `[8-byte big-endian payload length][payload]`, where
the payload is the JSON encoding of the value. The file carries no per-record
type tag; a buffer is homogeneous and decodes every frame as its own record
type.
*/

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, SpoolError};

/// Size of the length prefix in front of every payload
pub const FRAME_HEADER_LEN: u64 = 8;

/// Values a buffer can hold and mirror to disk
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A serialized record ready to be appended
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    bytes: Bytes,
    payload_len: u64,
}

impl EncodedFrame {
    /// Length prefix plus payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the payload alone, as recorded in the prefix
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Total bytes the frame occupies in the file
    pub fn frame_len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Encode a value into a length-prefixed frame
///
/// # Errors
/// * `SpoolError::Json` - If the value cannot be serialized
/// * `SpoolError::RecordTooLarge` - If the payload length overflows the prefix
pub fn encode_frame<T: Serialize>(value: &T) -> Result<EncodedFrame> {
    let payload = serde_json::to_vec(value)?;
    let payload_len = i64::try_from(payload.len())
        .map_err(|_| SpoolError::RecordTooLarge {
            size: payload.len(),
        })? as u64;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    buf.put_u64(payload_len);
    buf.put_slice(&payload);

    Ok(EncodedFrame {
        bytes: buf.freeze(),
        payload_len,
    })
}

/// Decode the payload length from a frame prefix
pub fn decode_frame_len(prefix: [u8; FRAME_HEADER_LEN as usize]) -> u64 {
    u64::from_be_bytes(prefix)
}

/// Decode a payload back into a value of the buffer's record type
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// File footprint of a record whose payload is `payload_len` bytes
pub fn frame_len(payload_len: u64) -> u64 {
    FRAME_HEADER_LEN + payload_len
}
