//! Control surface shared by the queue and stack facades.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::buffer::{Buffer, FlushReport};
use crate::codec::Record;
use crate::Result;

/// A facade over a shared [`Buffer`]
///
/// Everything except the insert/remove pair is the same for both flavors and
/// is provided here.
pub trait Collection<T: Record> {
    fn buffer(&self) -> &Arc<Buffer<T>>;

    fn len(&self) -> usize {
        self.buffer().len()
    }

    fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    fn id(&self) -> Uuid {
        self.buffer().id()
    }

    fn clear(&self) {
        self.buffer().clear()
    }

    /// Append pending records to the backing file now
    fn flush(&self) -> Result<FlushReport> {
        self.buffer().flush()
    }

    /// Rebuild from the backing file now
    fn recover(&self) -> Result<usize> {
        self.buffer().recover()
    }

    fn persistence_period(&self) -> Duration {
        self.buffer().persistence_period()
    }

    fn set_persistence_period(&self, period: Duration) {
        self.buffer().set_persistence_period(period)
    }

    fn persistence_enabled(&self) -> bool {
        self.buffer().persistence_enabled()
    }

    fn set_persistence_enabled(&self, enabled: bool) {
        self.buffer().set_persistence_enabled(enabled)
    }

    fn recovery_enabled(&self) -> bool {
        self.buffer().recovery_enabled()
    }

    fn set_recovery_enabled(&self, enabled: bool) {
        self.buffer().set_recovery_enabled(enabled)
    }

    fn backing_file(&self) -> Option<PathBuf> {
        self.buffer().backing_file()
    }
}
