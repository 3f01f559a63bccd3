/*!
Background flushing for registered buffers.

Each registry owns one [`Scheduler`]. Every buffer it tracks gets its own
task that sleeps for the buffer's current persistence period and then makes
one guarded flush attempt, so an idle buffer costs one timer and never a busy
loop. Flushes run on the blocking pool and transient I/O failures are retried
with backoff.
*/

use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::buffer::Buffer;
use crate::codec::Record;
use crate::SpoolError;

/// Lower bound on the sleep between two attempts for one buffer
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

// Used when the registry is created outside of any tokio runtime.
static BACKGROUND_RT: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("spool-flush")
        .enable_all()
        .build()
        .expect("Failed to create background flush runtime")
});

/// Per-flavor owner of the flush tasks
pub struct Scheduler {
    flavor: &'static str,
    handle: Handle,
    tasks: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
}

impl Scheduler {
    /// Scheduler on the current tokio runtime, or the shared background one
    pub fn new(flavor: &'static str) -> Self {
        let handle = Handle::try_current().unwrap_or_else(|_| BACKGROUND_RT.handle().clone());
        Self::with_handle(flavor, handle)
    }

    pub fn with_handle(flavor: &'static str, handle: Handle) -> Self {
        Self {
            flavor,
            handle,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start the flush task for `buffer`, replacing any task already on `path`
    pub fn track<T: Record>(&self, path: &Path, buffer: Arc<Buffer<T>>) {
        let flavor = self.flavor;
        let task_path = path.to_path_buf();
        let task = self
            .handle
            .spawn(async move { flush_loop(flavor, task_path, buffer).await });

        if let Some(previous) = self.tasks.lock().insert(path.to_path_buf(), task) {
            previous.abort();
        }
        debug!(flavor, path = %path.display(), "tracking buffer");
    }

    /// Stop the flush task on `path`; returns false if none was running
    pub fn untrack(&self, path: &Path) -> bool {
        match self.tasks.lock().remove(path) {
            Some(task) => {
                task.abort();
                debug!(flavor = self.flavor, path = %path.display(), "untracked buffer");
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, path: &Path) -> bool {
        self.tasks.lock().contains_key(path)
    }

    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stop every flush task
    pub fn shutdown(&self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn flush_loop<T: Record>(flavor: &'static str, path: PathBuf, buffer: Arc<Buffer<T>>) {
    loop {
        let period = buffer.persistence_period().max(MIN_FLUSH_INTERVAL);
        tokio::time::sleep(period).await;

        if !buffer.persistence_enabled() {
            continue;
        }

        let result = spool_retry::with_backoff("flush", |_attempt| {
            let buffer = Arc::clone(&buffer);
            async move {
                tokio::task::spawn_blocking(move || buffer.periodic_flush())
                    .await
                    .map_err(|e| SpoolError::Io(io::Error::new(io::ErrorKind::Other, e)))?
            }
            .boxed()
        })
        .await;

        match result {
            Ok(Some(report)) => debug!(
                flavor,
                path = %path.display(),
                records = report.records_appended,
                bytes = report.bytes_appended,
                "scheduled flush complete"
            ),
            Ok(None) => {}
            Err(err) => error!(
                flavor,
                path = %path.display(),
                error = %err,
                "scheduled flush failed"
            ),
        }
    }
}
