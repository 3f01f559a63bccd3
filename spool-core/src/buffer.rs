/*!
The persistence engine: one buffer, its metadata and its backing file.

A [`Buffer`] keeps its records in memory and, when persistence is enabled,
mirrors them into a single append-only file:

- [`Buffer::flush`] appends every record added since the last flush, then
  rewrites the header. A crash mid-append leaves unreferenced bytes past the
  committed end offset, which recovery never reads.
- Removing a flushed record from either end shrinks the retained region of
  the file instead of rewriting it.
- [`Buffer::recover`] reads the header and replays the retained region into
  a fresh sequence.

Every operation on one buffer is serialized by its lock.
*/

use parking_lot::RwLock;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{decode_frame_len, decode_payload, encode_frame, Record, FRAME_HEADER_LEN};
use crate::config::{BufferOptions, DEFAULT_PERSISTENCE_PERIOD};
use crate::metadata::{BufferMetadata, METADATA_SIZE};
use crate::sequence::LinkedSequence;
use crate::{Result, SpoolError};

#[cfg(feature = "metrics")]
use crate::observability::{MetricsTimer, SpoolMetrics};

/// Outcome of a successful flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Records appended to the file by this flush
    pub records_appended: usize,
    /// Bytes appended to the record region by this flush
    pub bytes_appended: u64,
}

struct BufferState<T> {
    meta: BufferMetadata,
    records: LinkedSequence<T>,
    path: Option<PathBuf>,
    type_registered: bool,
    register_on_first_insert: bool,
}

impl<T> BufferState<T> {
    fn note_insert(&mut self) {
        if self.register_on_first_insert && !self.type_registered {
            self.type_registered = true;
        }
    }
}

/// A double-ended buffer of `T`, optionally mirrored to a backing file
pub struct Buffer<T: Record> {
    state: RwLock<BufferState<T>>,
    flushing: AtomicBool,
}

impl<T: Record> Buffer<T> {
    /// Create a buffer from options; nothing is read from or written to disk yet
    pub fn new(options: &BufferOptions) -> Self {
        Self {
            state: RwLock::new(BufferState {
                meta: BufferMetadata::from_options(options),
                records: LinkedSequence::new(),
                path: options.backing_file.clone(),
                type_registered: false,
                register_on_first_insert: options.register_on_first_insert,
            }),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.read().meta.id
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn add_at_head(&self, value: T) {
        let mut state = self.state.write();
        state.records.push_front(value);
        state.note_insert();
    }

    pub fn add_at_tail(&self, value: T) {
        let mut state = self.state.write();
        state.records.push_back(value);
        state.note_insert();
    }

    /// Value at the head, or `EmptyCollection`
    pub fn peek_head(&self) -> Result<T> {
        self.state.read().records.peek_front().cloned()
    }

    /// Value at the tail, or `EmptyCollection`
    pub fn peek_tail(&self) -> Result<T> {
        self.state.read().records.peek_back().cloned()
    }

    /// Detach the head record, reconciling the file offsets if it was flushed
    ///
    /// Returns `Ok(None)` on an empty buffer. If reconciling fails the record
    /// stays in place and the error is returned.
    pub fn remove_head(&self) -> Result<Option<T>> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        match state.records.front_encoded_len() {
            None => return Ok(None),
            Some(0) => {}
            Some(encoded_len) => {
                state.meta.reconcile_head(encoded_len)?;
                debug!(
                    buffer = %state.meta.id,
                    start = state.meta.file_start_offset,
                    end = state.meta.file_end_offset,
                    "reconciled head eviction"
                );
            }
        }
        Ok(state.records.pop_front())
    }

    /// Detach the tail record, reconciling the file offsets if it was flushed
    pub fn remove_tail(&self) -> Result<Option<T>> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        match state.records.back_encoded_len() {
            None => return Ok(None),
            Some(0) => {}
            Some(encoded_len) => {
                state.meta.reconcile_tail(encoded_len)?;
                debug!(
                    buffer = %state.meta.id,
                    start = state.meta.file_start_offset,
                    end = state.meta.file_end_offset,
                    "reconciled tail eviction"
                );
            }
        }
        Ok(state.records.pop_back())
    }

    /// Drop every in-memory record; the file's retained region is left as is
    pub fn clear(&self) {
        self.state.write().records.clear();
    }

    /// Declare `T` as the record type, enabling recovery
    pub fn register_type(&self) {
        self.state.write().type_registered = true;
    }

    pub fn is_type_registered(&self) -> bool {
        self.state.read().type_registered
    }

    pub fn persistence_period(&self) -> Duration {
        self.state.read().meta.persistence_period
    }

    pub fn set_persistence_period(&self, period: Duration) {
        self.state.write().meta.persistence_period = period;
    }

    pub fn persistence_enabled(&self) -> bool {
        self.state.read().meta.persistence_enabled
    }

    pub fn set_persistence_enabled(&self, enabled: bool) {
        self.state.write().meta.persistence_enabled = enabled;
    }

    pub fn recovery_enabled(&self) -> bool {
        self.state.read().meta.recovery_enabled
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.state.write().meta.recovery_enabled = enabled;
    }

    pub fn backing_file(&self) -> Option<PathBuf> {
        self.state.read().path.clone()
    }

    /// Bind the buffer to `path`
    ///
    /// Moving to a different file drops the offsets and the cursor of the old
    /// one, so the next flush writes every live record into the new file.
    pub(crate) fn relocate(&self, path: PathBuf) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.path.as_ref() == Some(&path) {
            return;
        }
        debug!(
            buffer = %state.meta.id,
            path = %path.display(),
            "binding buffer to backing file"
        );
        state.path = Some(path);
        state.meta.forget_persisted();
        state.records.mark_all_pending();
    }

    /// Turn persistence on, assigning the default period if none is set
    pub(crate) fn enable_persistence_with_default_period(&self) {
        let mut state = self.state.write();
        state.meta.persistence_enabled = true;
        if state.meta.persistence_period.is_zero() {
            state.meta.persistence_period = DEFAULT_PERSISTENCE_PERIOD;
        }
    }

    /// Run `f` while holding the state lock, as a flush does during its I/O
    #[cfg(test)]
    pub(crate) fn with_state_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.write();
        f()
    }

    /// Snapshot of the current metadata
    pub fn metadata(&self) -> BufferMetadata {
        let state = self.state.read();
        let mut meta = state.meta.clone();
        meta.length = state.records.len() as u64;
        meta
    }

    /// Records not yet written to the backing file
    pub fn pending_count(&self) -> usize {
        self.state.read().records.pending_count()
    }

    /// Head-to-tail copy of the buffered values
    pub fn values(&self) -> Vec<T> {
        self.state.read().records.iter().cloned().collect()
    }

    /// Append every pending record to the backing file, then rewrite the header
    ///
    /// # Errors
    /// * `SpoolError::PersistenceDisabled` - If persistence is switched off
    /// * `SpoolError::NoBackingFile` - If no file is bound
    /// * `SpoolError::RecordTooLarge` / `SpoolError::Json` - If a record cannot be encoded
    /// * `SpoolError::Io` - If the file cannot be written
    pub fn flush(&self) -> Result<FlushReport> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start_flush();

        let result = self.flush_locked();

        #[cfg(feature = "metrics")]
        match &result {
            Ok(report) => timer.finish(report.bytes_appended),
            Err(_) => timer.finish_with_error(),
        }

        result
    }

    fn flush_locked(&self) -> Result<FlushReport> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if !state.meta.persistence_enabled {
            return Err(SpoolError::PersistenceDisabled);
        }
        let path = state.path.clone().ok_or(SpoolError::NoBackingFile)?;

        let mut file = OpenOptions::new().create(true).write(true).open(&path)?;
        state.meta.reserve_header();

        // Encode everything first so an unencodable record aborts before any write.
        let mut frames = Vec::new();
        let mut next = state.records.next_pending();
        while let Some(id) = next {
            frames.push((id, encode_frame(state.records.value(id))?));
            next = state.records.next(id);
        }

        let mut report = FlushReport::default();
        if !frames.is_empty() {
            file.seek(SeekFrom::Start(state.meta.file_end_offset))?;
            let mut out = BufWriter::new(&mut file);
            for (_, frame) in &frames {
                out.write_all(frame.as_bytes())?;
            }
            out.flush()?;
            drop(out);
            file.sync_data()?;
        }

        for (id, frame) in frames {
            state.records.mark_persisted(id, frame.payload_len());
            state.meta.file_end_offset += frame.frame_len();
            report.records_appended += 1;
            report.bytes_appended += frame.frame_len();
        }

        state.meta.length = state.records.len() as u64;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&state.meta.encode())?;
        file.sync_data()?;

        debug!(
            buffer = %state.meta.id,
            path = %path.display(),
            records = report.records_appended,
            bytes = report.bytes_appended,
            end = state.meta.file_end_offset,
            "flushed buffer"
        );
        Ok(report)
    }

    /// Flush on behalf of the scheduler
    ///
    /// Returns `Ok(None)` without touching the file when persistence is off or
    /// another scheduled attempt on this buffer is still running.
    pub fn periodic_flush(&self) -> Result<Option<FlushReport>> {
        // The flag is claimed before the state lock is touched.
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("flush already in progress, skipping");
            #[cfg(feature = "metrics")]
            SpoolMetrics::global().record_skipped_flush();
            return Ok(None);
        }

        let result = if self.persistence_enabled() {
            self.flush().map(Some)
        } else {
            #[cfg(feature = "metrics")]
            SpoolMetrics::global().record_skipped_flush();
            Ok(None)
        };
        self.flushing.store(false, Ordering::Release);
        result
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Rebuild the buffer from its backing file
    ///
    /// The current state is replaced only if the whole file replays cleanly;
    /// on error the buffer is left untouched. Returns the number of records
    /// recovered.
    ///
    /// # Errors
    /// * `SpoolError::RecoveryDisabled` - If recovery is switched off
    /// * `SpoolError::NoBackingFile` - If no file is bound
    /// * `SpoolError::Io` - If the file cannot be opened or read
    /// * `SpoolError::CorruptFile` - If the header or a frame is inconsistent
    /// * `SpoolError::TypeNotRegistered` - If the record type was not registered
    pub fn recover(&self) -> Result<usize> {
        let result = self.recover_locked();

        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => SpoolMetrics::global().record_recovery(),
            Err(_) => SpoolMetrics::global().record_recovery_failure(),
        }

        result
    }

    fn recover_locked(&self) -> Result<usize> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if !state.meta.recovery_enabled {
            return Err(SpoolError::RecoveryDisabled);
        }
        let path = state.path.clone().ok_or(SpoolError::NoBackingFile)?;

        let mut reader = BufReader::new(File::open(&path)?);
        let mut meta = read_header(&mut reader)?;
        if !state.type_registered {
            return Err(SpoolError::TypeNotRegistered);
        }
        let records = replay_records::<T, _>(&mut reader, &meta)?;

        let recovered = records.len();
        if meta.length != recovered as u64 {
            warn!(
                path = %path.display(),
                header_length = meta.length,
                recovered,
                "header length disagrees with replayed records"
            );
        }
        meta.recovery_enabled = true;
        meta.length = recovered as u64;

        info!(
            buffer = %meta.id,
            path = %path.display(),
            records = recovered,
            "recovered buffer"
        );
        state.meta = meta;
        state.records = records;
        Ok(recovered)
    }
}

impl<T: Record> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Buffer")
            .field("id", &state.meta.id)
            .field("len", &state.records.len())
            .field("path", &state.path)
            .finish()
    }
}

/// Read only the header of a backing file
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<BufferMetadata> {
    let mut file = File::open(path)?;
    read_header(&mut file)
}

fn read_header<R: Read>(reader: &mut R) -> Result<BufferMetadata> {
    let mut block = vec![0u8; METADATA_SIZE as usize];
    read_exact_or_corrupt(reader, &mut block, "header")?;
    BufferMetadata::decode(&block)
}

fn replay_records<T: Record, R: Read + Seek>(
    reader: &mut R,
    meta: &BufferMetadata,
) -> Result<LinkedSequence<T>> {
    let mut records = LinkedSequence::new();
    if meta.is_unpersisted() {
        return Ok(records);
    }

    let end = meta.file_end_offset;
    let mut offset = meta.file_start_offset;
    reader.seek(SeekFrom::Start(offset))?;

    while offset < end {
        if offset + FRAME_HEADER_LEN > end {
            return Err(SpoolError::corrupt(format!(
                "frame prefix at {offset} crosses retained end {end}"
            )));
        }
        let mut prefix = [0u8; FRAME_HEADER_LEN as usize];
        read_exact_or_corrupt(reader, &mut prefix, "frame prefix")?;
        let payload_len = decode_frame_len(prefix);

        let frame_end = offset
            .checked_add(FRAME_HEADER_LEN)
            .and_then(|v| v.checked_add(payload_len))
            .filter(|frame_end| *frame_end <= end)
            .ok_or_else(|| {
                SpoolError::corrupt(format!(
                    "frame at {offset} with payload {payload_len} exceeds retained end {end}"
                ))
            })?;
        if payload_len == 0 {
            return Err(SpoolError::corrupt(format!("empty frame at {offset}")));
        }

        let mut payload = vec![0u8; payload_len as usize];
        read_exact_or_corrupt(reader, &mut payload, "frame payload")?;
        let value: T = decode_payload(&payload)?;
        records.push_back_persisted(value, payload_len);

        offset = frame_end;
    }
    Ok(records)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SpoolError::corrupt(format!("truncated {what}")),
        _ => SpoolError::Io(e),
    })
}
