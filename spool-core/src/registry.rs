/*!
Process-level registry of live buffers, keyed by backing-file path.

A registry guarantees at most one in-memory buffer per path and owns the
scheduler that flushes its buffers in the background. Registries are plain
values: construct one per collection flavor at startup and hand it to the
facades, or build isolated ones in tests.
*/

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::buffer::{Buffer, FlushReport};
use crate::codec::Record;
use crate::config::BufferOptions;
use crate::scheduler::Scheduler;
use crate::{Result, SpoolError};

/// Per-flavor registry policy
pub trait Flavor: Send + Sync + 'static {
    /// Name used in logs
    const NAME: &'static str;
    /// Whether `destroy` also removes the backing file
    const DELETE_FILE_ON_DESTROY: bool;
}

/// FIFO flavor; destroying a queue keeps its file on disk
#[derive(Debug, Clone, Copy)]
pub struct QueueFlavor;

impl Flavor for QueueFlavor {
    const NAME: &'static str = "queue";
    const DELETE_FILE_ON_DESTROY: bool = false;
}

/// LIFO flavor; destroying a stack deletes its file
#[derive(Debug, Clone, Copy)]
pub struct StackFlavor;

impl Flavor for StackFlavor {
    const NAME: &'static str = "stack";
    const DELETE_FILE_ON_DESTROY: bool = true;
}

/// How `bind` produced its buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindStatus {
    /// The path was already registered; the live buffer is returned
    Existing,
    /// A new buffer was created without recovery
    Fresh,
    /// A new buffer was rebuilt from its backing file
    Recovered { records: usize },
    /// Recovery failed; the buffer kept its in-memory state (empty when newly
    /// created) and the file was left untouched
    RecoveryFailed { reason: String },
}

/// Result of [`Registry::bind`]
#[derive(Debug, Clone)]
pub struct Binding<T: Record> {
    pub buffer: Arc<Buffer<T>>,
    pub status: BindStatus,
}

pub struct Registry<T: Record, F: Flavor> {
    instances: RwLock<HashMap<PathBuf, Arc<Buffer<T>>>>,
    scheduler: Scheduler,
    _flavor: PhantomData<F>,
}

pub type QueueRegistry<T> = Registry<T, QueueFlavor>;
pub type StackRegistry<T> = Registry<T, StackFlavor>;

impl<T: Record, F: Flavor> Registry<T, F> {
    /// Empty registry whose scheduler runs on the current tokio runtime,
    /// or on a shared background runtime outside of one
    pub fn new() -> Self {
        Self::with_scheduler(Scheduler::new(F::NAME))
    }

    /// Empty registry whose scheduler runs on `handle`
    pub fn with_runtime(handle: Handle) -> Self {
        Self::with_scheduler(Scheduler::with_handle(F::NAME, handle))
    }

    fn with_scheduler(scheduler: Scheduler) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            scheduler,
            _flavor: PhantomData,
        }
    }

    /// Look up the buffer on the options' path, or create, recover and register it
    ///
    /// Without a backing file the buffer is created in memory and not
    /// registered. A failed recovery is not an error: the new buffer starts
    /// empty, the status says why, and the existing file is not modified.
    pub fn bind(&self, options: BufferOptions) -> Result<Binding<T>> {
        options.validate()?;
        let path = match &options.backing_file {
            Some(path) => path.clone(),
            None => {
                return Ok(Binding {
                    buffer: Arc::new(Buffer::new(&options)),
                    status: BindStatus::Fresh,
                })
            }
        };

        let mut instances = self.instances.write();
        if let Some(existing) = instances.get(&path) {
            return Ok(Binding {
                buffer: Arc::clone(existing),
                status: BindStatus::Existing,
            });
        }

        let buffer = Arc::new(Buffer::new(&options));
        let status = if options.recovery_enabled {
            match self.recover_into(&buffer, &path) {
                Ok(records) => BindStatus::Recovered { records },
                Err(reason) => BindStatus::RecoveryFailed { reason },
            }
        } else {
            BindStatus::Fresh
        };

        if options.persistence_enabled {
            buffer.set_persistence_period(options.effective_period());
            buffer.enable_persistence_with_default_period();
        }

        instances.insert(path.clone(), Arc::clone(&buffer));
        self.scheduler.track(&path, Arc::clone(&buffer));
        info!(flavor = F::NAME, path = %path.display(), status = ?status, "bound buffer");

        Ok(Binding { buffer, status })
    }

    /// Durable lookup-or-create on `path`: persistence and recovery enabled
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Buffer<T>>> {
        Ok(self.bind(BufferOptions::durable(path))?.buffer)
    }

    /// Give an unbound buffer its backing file
    ///
    /// Returns `Existing` without change if the buffer is already on `path`.
    /// Fails with `PathConflict` if it is bound elsewhere, or `PathInUse` if
    /// `path` belongs to another buffer; use [`Registry::rebind`] to force
    /// either case.
    pub fn attach<P: AsRef<Path>>(
        &self,
        buffer: &Arc<Buffer<T>>,
        path: P,
    ) -> Result<BindStatus> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(SpoolError::validation("backing file path cannot be empty"));
        }

        match buffer.backing_file() {
            Some(current) if current == path => return Ok(BindStatus::Existing),
            Some(current) => {
                return Err(SpoolError::PathConflict {
                    requested: path,
                    existing: current,
                })
            }
            None => {}
        }

        let owner = {
            let mut instances = self.instances.write();
            match instances.get(&path) {
                Some(owner) => Some(Arc::clone(owner)),
                None => {
                    instances.insert(path.clone(), Arc::clone(buffer));
                    None
                }
            }
        };
        if let Some(owner) = owner {
            return Err(SpoolError::PathInUse {
                path,
                owner: owner.id(),
            });
        }

        Ok(self.install(buffer, path))
    }

    /// Move a buffer to `path`, detaching it from its previous path
    ///
    /// If `path` already names a live buffer, that buffer is returned with
    /// `BindStatus::Existing` and `buffer` is left as it was. Callers must
    /// continue with the returned handle.
    pub fn rebind<P: AsRef<Path>>(
        &self,
        buffer: &Arc<Buffer<T>>,
        path: P,
    ) -> Result<Binding<T>> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(SpoolError::validation("backing file path cannot be empty"));
        }
        let previous = buffer.backing_file();

        {
            let mut instances = self.instances.write();
            if let Some(existing) = instances.get(&path) {
                return Ok(Binding {
                    buffer: Arc::clone(existing),
                    status: BindStatus::Existing,
                });
            }

            if let Some(previous) = &previous {
                let owned = instances
                    .get(previous)
                    .map_or(false, |registered| Arc::ptr_eq(registered, buffer));
                if owned {
                    instances.remove(previous);
                    self.scheduler.untrack(previous);
                }
            }
            instances.insert(path.clone(), Arc::clone(buffer));
        }

        let status = self.install(buffer, path);
        Ok(Binding {
            buffer: Arc::clone(buffer),
            status,
        })
    }

    /// Point a freshly registered buffer at `path`, recover it and start flushing
    ///
    /// Must be called without the registry lock held; recovery takes the
    /// buffer's own lock.
    fn install(&self, buffer: &Arc<Buffer<T>>, path: PathBuf) -> BindStatus {
        buffer.relocate(path.clone());

        let status = if buffer.recovery_enabled() {
            match self.recover_into(buffer, &path) {
                Ok(records) => BindStatus::Recovered { records },
                Err(reason) => BindStatus::RecoveryFailed { reason },
            }
        } else {
            BindStatus::Fresh
        };
        buffer.enable_persistence_with_default_period();

        // A concurrent destroy may have removed the path meanwhile.
        let instances = self.instances.read();
        if instances
            .get(&path)
            .map_or(false, |registered| Arc::ptr_eq(registered, buffer))
        {
            self.scheduler.track(&path, Arc::clone(buffer));
        }
        drop(instances);

        info!(flavor = F::NAME, path = %path.display(), status = ?status, "attached buffer");
        status
    }

    fn recover_into(&self, buffer: &Buffer<T>, path: &Path) -> std::result::Result<usize, String> {
        buffer.register_type();
        buffer.recover().map_err(|err| {
            warn!(
                flavor = F::NAME,
                path = %path.display(),
                error = %err,
                "recovery failed, keeping in-memory state"
            );
            err.to_string()
        })
    }

    /// Remove the buffer on `path` from the registry
    ///
    /// Stack registries also delete the backing file; queue registries keep
    /// it. Returns whether a buffer was registered on `path`.
    pub fn destroy<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let path = path.as_ref();
        let removed = self.instances.write().remove(path).is_some();
        if !removed {
            return Ok(false);
        }
        self.scheduler.untrack(path);

        if F::DELETE_FILE_ON_DESTROY {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(flavor = F::NAME, path = %path.display(), "destroyed buffer");
        Ok(true)
    }

    pub fn lookup<P: AsRef<Path>>(&self, path: P) -> Option<Arc<Buffer<T>>> {
        self.instances.read().get(path.as_ref()).cloned()
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.instances.read().contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.instances.read().keys().cloned().collect()
    }

    /// Flush every persistence-enabled buffer now, e.g. before shutdown
    pub fn flush_all(&self) -> Vec<(PathBuf, Result<FlushReport>)> {
        let snapshot: Vec<_> = self
            .instances
            .read()
            .iter()
            .map(|(path, buffer)| (path.clone(), Arc::clone(buffer)))
            .collect();

        snapshot
            .into_iter()
            .filter(|(_, buffer)| buffer.persistence_enabled())
            .map(|(path, buffer)| (path, buffer.flush()))
            .collect()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl<T: Record, F: Flavor> Default for Registry<T, F> {
    fn default() -> Self {
        Self::new()
    }
}
