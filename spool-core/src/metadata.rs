/*!
Buffer metadata and its fixed-size on-disk header.

The header occupies bytes `[0, METADATA_SIZE)` of the backing file and is the
only region ever rewritten in place. Layout (big-endian):

```text
 0..4    magic "SPL1"
 4       format version
 5       flags (bit 0 recovery, bit 1 persistence)
 6..8    reserved
 8..24   buffer id (UUID)
24..32   logical length
32..40   persistence period, milliseconds
40..48   retained region start offset
48..56   retained region end offset
56..64   created at, unix milliseconds
64..96   SHA-256 of bytes 0..64
96..256  zero padding
```
*/

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::codec::frame_len;
use crate::config::{BufferOptions, DEFAULT_PERSISTENCE_PERIOD};
use crate::{Result, SpoolError};

/// Bytes reserved at the start of every backing file for the header
pub const METADATA_SIZE: u64 = 256;

/// Current header format version
pub const METADATA_FORMAT_VERSION: u8 = 1;

const MAGIC: &[u8; 4] = b"SPL1";
const CHECKSUMMED_LEN: usize = 64;
const CHECKSUM_LEN: usize = 32;

const FLAG_RECOVERY: u8 = 0b01;
const FLAG_PERSISTENCE: u8 = 0b10;

/// Durable bookkeeping for one buffer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BufferMetadata {
    /// Identity of the buffer, stable across recoveries
    pub id: Uuid,

    /// Number of records at the time of the snapshot
    pub length: u64,

    /// Whether the buffer is rebuilt from its file on bind
    pub recovery_enabled: bool,

    /// Whether flushes are allowed
    pub persistence_enabled: bool,

    /// Interval between scheduled flushes
    pub persistence_period: Duration,

    /// First byte of the retained record region, zero if nothing was ever flushed
    pub file_start_offset: u64,

    /// One past the last byte of the retained record region
    pub file_end_offset: u64,

    /// When the buffer was first created
    pub created_at: DateTime<Utc>,
}

impl BufferMetadata {
    /// Fresh metadata with a new identity and nothing persisted
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            length: 0,
            recovery_enabled: false,
            persistence_enabled: false,
            persistence_period: DEFAULT_PERSISTENCE_PERIOD,
            file_start_offset: 0,
            file_end_offset: 0,
            created_at: now_millis(),
        }
    }

    /// Fresh metadata carrying the control flags of `options`
    pub fn from_options(options: &BufferOptions) -> Self {
        Self {
            recovery_enabled: options.recovery_enabled,
            persistence_enabled: options.persistence_enabled,
            persistence_period: options.persistence_period,
            ..Self::new()
        }
    }

    /// True until the first flush reserves the header region
    pub fn is_unpersisted(&self) -> bool {
        self.file_start_offset == 0
    }

    /// Bytes of record frames currently retained in the file
    pub fn retained_bytes(&self) -> u64 {
        self.file_end_offset - self.file_start_offset
    }

    /// Reserve the header region on the first flush
    pub fn reserve_header(&mut self) {
        if self.is_unpersisted() {
            self.file_start_offset = METADATA_SIZE;
            self.file_end_offset = METADATA_SIZE;
        }
    }

    /// Drop all file bookkeeping, as if nothing had ever been flushed
    pub fn forget_persisted(&mut self) {
        self.file_start_offset = 0;
        self.file_end_offset = 0;
    }

    /// Shrink the retained region from the front after a flushed head record left
    ///
    /// # Errors
    /// * `SpoolError::NotPersisted` - If `encoded_len` is zero
    /// * `SpoolError::OffsetBelowMetadataRegion` - If the start offset overlaps the header
    pub fn reconcile_head(&mut self, encoded_len: u64) -> Result<()> {
        if encoded_len == 0 {
            return Err(SpoolError::NotPersisted);
        }
        if self.file_start_offset < METADATA_SIZE {
            return Err(SpoolError::OffsetBelowMetadataRegion {
                offset: self.file_start_offset,
            });
        }

        let len = frame_len(encoded_len);
        if self.file_start_offset + len >= self.file_end_offset {
            self.collapse();
        } else {
            self.file_start_offset += len;
        }
        Ok(())
    }

    /// Shrink the retained region from the back after a flushed tail record left
    ///
    /// # Errors
    /// * `SpoolError::NotPersisted` - If `encoded_len` is zero
    /// * `SpoolError::OffsetBelowMetadataRegion` - If the end offset would cut into the header
    pub fn reconcile_tail(&mut self, encoded_len: u64) -> Result<()> {
        if encoded_len == 0 {
            return Err(SpoolError::NotPersisted);
        }

        let len = frame_len(encoded_len);
        if self.file_end_offset < METADATA_SIZE + len {
            return Err(SpoolError::OffsetBelowMetadataRegion {
                offset: self.file_end_offset,
            });
        }

        if self.file_end_offset - len <= self.file_start_offset {
            self.collapse();
        } else {
            self.file_end_offset -= len;
        }
        Ok(())
    }

    fn collapse(&mut self) {
        self.file_start_offset = METADATA_SIZE;
        self.file_end_offset = METADATA_SIZE;
    }

    /// Serialize into the fixed-size header block
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.recovery_enabled {
            flags |= FLAG_RECOVERY;
        }
        if self.persistence_enabled {
            flags |= FLAG_PERSISTENCE;
        }

        let mut buf = BytesMut::with_capacity(METADATA_SIZE as usize);
        buf.put_slice(MAGIC);
        buf.put_u8(METADATA_FORMAT_VERSION);
        buf.put_u8(flags);
        buf.put_u16(0);
        buf.put_slice(self.id.as_bytes());
        buf.put_u64(self.length);
        buf.put_u64(u64::try_from(self.persistence_period.as_millis()).unwrap_or(u64::MAX));
        buf.put_u64(self.file_start_offset);
        buf.put_u64(self.file_end_offset);
        buf.put_i64(self.created_at.timestamp_millis());

        let digest = Sha256::digest(&buf[..CHECKSUMMED_LEN]);
        buf.put_slice(&digest);
        buf.resize(METADATA_SIZE as usize, 0);
        buf.to_vec()
    }

    /// Parse and verify a header block
    ///
    /// # Errors
    /// * `SpoolError::CorruptFile` - On a short block, bad magic, unknown
    ///   version, checksum mismatch or inconsistent offsets
    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < METADATA_SIZE as usize {
            return Err(SpoolError::corrupt(format!(
                "header is {} bytes, expected {}",
                block.len(),
                METADATA_SIZE
            )));
        }

        let stored = &block[CHECKSUMMED_LEN..CHECKSUMMED_LEN + CHECKSUM_LEN];
        let computed = Sha256::digest(&block[..CHECKSUMMED_LEN]);
        if stored != computed.as_slice() {
            return Err(SpoolError::corrupt("header checksum mismatch"));
        }

        let mut cur = &block[..CHECKSUMMED_LEN];
        let mut magic = [0u8; 4];
        cur.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(SpoolError::corrupt("bad header magic"));
        }
        let version = cur.get_u8();
        if version != METADATA_FORMAT_VERSION {
            return Err(SpoolError::corrupt(format!(
                "unsupported header version {version}"
            )));
        }
        let flags = cur.get_u8();
        let _reserved = cur.get_u16();
        let mut id = [0u8; 16];
        cur.copy_to_slice(&mut id);
        let length = cur.get_u64();
        let period_ms = cur.get_u64();
        let file_start_offset = cur.get_u64();
        let file_end_offset = cur.get_u64();
        let created_ms = cur.get_i64();

        if file_start_offset > file_end_offset
            || (file_start_offset != 0 && file_start_offset < METADATA_SIZE)
        {
            return Err(SpoolError::corrupt(format!(
                "inconsistent retained region {file_start_offset}..{file_end_offset}"
            )));
        }

        let created_at = Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| SpoolError::corrupt("creation time out of range"))?;

        Ok(Self {
            id: Uuid::from_bytes(id),
            length,
            recovery_enabled: flags & FLAG_RECOVERY != 0,
            persistence_enabled: flags & FLAG_PERSISTENCE != 0,
            persistence_period: Duration::from_millis(period_ms),
            file_start_offset,
            file_end_offset,
            created_at,
        })
    }
}

impl Default for BufferMetadata {
    fn default() -> Self {
        Self::new()
    }
}

// The header stores millisecond precision, so in-memory values match it.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(start: u64, end: u64) -> BufferMetadata {
        BufferMetadata {
            file_start_offset: start,
            file_end_offset: end,
            ..BufferMetadata::new()
        }
    }

    #[test]
    fn test_header_fits_reserved_region() {
        assert!(METADATA_SIZE >= 202);
        assert_eq!(BufferMetadata::new().encode().len(), METADATA_SIZE as usize);
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let mut meta = BufferMetadata::new();
        meta.length = 7;
        meta.recovery_enabled = true;
        meta.persistence_period = Duration::from_millis(1500);
        meta.file_start_offset = METADATA_SIZE + 10;
        meta.file_end_offset = METADATA_SIZE + 90;

        let decoded = BufferMetadata::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_decode_detects_tampering() {
        let mut block = BufferMetadata::new().encode();
        block[30] ^= 0xff;

        let err = BufferMetadata::decode(&block).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_decode_rejects_short_block() {
        let block = BufferMetadata::new().encode();
        assert!(BufferMetadata::decode(&block[..100]).is_err());
    }

    #[test]
    fn test_decode_rejects_offsets_inside_header() {
        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 20);
        meta.file_start_offset = 12;

        let err = BufferMetadata::decode(&meta.encode()).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn test_forget_persisted_returns_to_unpersisted() {
        let mut meta = BufferMetadata::new();
        meta.reserve_header();
        meta.file_end_offset += 40;

        meta.forget_persisted();
        assert!(meta.is_unpersisted());
        assert_eq!(meta.retained_bytes(), 0);

        meta.reserve_header();
        assert_eq!(meta.file_start_offset, METADATA_SIZE);
    }

    #[test]
    fn test_reserve_header_only_once() {
        let mut meta = BufferMetadata::new();
        assert!(meta.is_unpersisted());

        meta.reserve_header();
        assert_eq!(meta.file_start_offset, METADATA_SIZE);
        assert_eq!(meta.file_end_offset, METADATA_SIZE);

        meta.file_end_offset += 40;
        meta.reserve_header();
        assert_eq!(meta.file_end_offset, METADATA_SIZE + 40);
    }

    #[test]
    fn test_reconcile_head_advances_start() {
        // two frames of payload 2 and 4
        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 10 + 12);
        meta.reconcile_head(2).unwrap();
        assert_eq!(meta.file_start_offset, METADATA_SIZE + 10);
        assert_eq!(meta.retained_bytes(), 12);
    }

    #[test]
    fn test_reconcile_head_of_only_record_collapses() {
        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 10);
        meta.reconcile_head(2).unwrap();
        assert_eq!(meta.file_start_offset, METADATA_SIZE);
        assert_eq!(meta.file_end_offset, METADATA_SIZE);
    }

    #[test]
    fn test_reconcile_tail_shrinks_end() {
        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 10 + 12);
        meta.reconcile_tail(4).unwrap();
        assert_eq!(meta.file_end_offset, METADATA_SIZE + 10);

        meta.reconcile_tail(2).unwrap();
        assert_eq!(meta.retained_bytes(), 0);
        assert_eq!(meta.file_start_offset, METADATA_SIZE);
    }

    #[test]
    fn test_reconcile_requires_persisted_record() {
        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 10);
        assert!(matches!(meta.reconcile_head(0), Err(SpoolError::NotPersisted)));
        assert!(matches!(meta.reconcile_tail(0), Err(SpoolError::NotPersisted)));
    }

    #[test]
    fn test_reconcile_guards_metadata_region() {
        let mut meta = BufferMetadata::new();
        assert!(matches!(
            meta.reconcile_head(3),
            Err(SpoolError::OffsetBelowMetadataRegion { offset: 0 })
        ));

        let mut meta = persisted(METADATA_SIZE, METADATA_SIZE + 5);
        assert!(matches!(
            meta.reconcile_tail(3),
            Err(SpoolError::OffsetBelowMetadataRegion { .. })
        ));
    }
}
