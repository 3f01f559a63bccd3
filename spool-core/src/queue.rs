//! FIFO facade: enqueue at the tail, dequeue from the head.

use std::path::Path;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::codec::Record;
use crate::collection::Collection;
use crate::config::BufferOptions;
use crate::registry::{BindStatus, QueueRegistry};
use crate::{Result, SpoolError};

/// A first-in first-out handle over a shared buffer
///
/// Handles are cheap to clone; clones and handles bound to the same path
/// through one registry all see the same records.
#[derive(Debug, Clone)]
pub struct Queue<T: Record> {
    buffer: Arc<Buffer<T>>,
}

impl<T: Record> Queue<T> {
    /// In-memory queue, not registered anywhere
    pub fn new() -> Self {
        Self::from_buffer(Arc::new(Buffer::new(&BufferOptions::default())))
    }

    pub fn from_buffer(buffer: Arc<Buffer<T>>) -> Self {
        Self { buffer }
    }

    /// Bind through `registry`, returning the live queue if the path is taken
    pub fn open(registry: &QueueRegistry<T>, options: BufferOptions) -> Result<Self> {
        Ok(Self::from_buffer(registry.bind(options)?.buffer))
    }

    /// Durable lookup-or-create on `path`
    pub fn get<P: AsRef<Path>>(registry: &QueueRegistry<T>, path: P) -> Result<Self> {
        Ok(Self::from_buffer(registry.get(path)?))
    }

    pub fn enqueue(&self, value: T) {
        self.buffer.add_at_tail(value);
    }

    pub fn dequeue(&self) -> Result<T> {
        self.buffer
            .remove_head()?
            .ok_or(SpoolError::EmptyCollection)
    }

    /// Oldest value, left in place
    pub fn head(&self) -> Result<T> {
        self.buffer.peek_head()
    }

    /// Give this queue a backing file; see [`QueueRegistry::attach`]
    pub fn attach<P: AsRef<Path>>(
        &self,
        registry: &QueueRegistry<T>,
        path: P,
    ) -> Result<BindStatus> {
        registry.attach(&self.buffer, path)
    }

    /// Force this handle onto `path`; it may now point at a different buffer
    pub fn rebind<P: AsRef<Path>>(
        &mut self,
        registry: &QueueRegistry<T>,
        path: P,
    ) -> Result<BindStatus> {
        let binding = registry.rebind(&self.buffer, path)?;
        self.buffer = binding.buffer;
        Ok(binding.status)
    }
}

impl<T: Record> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> for Queue<T> {
    fn buffer(&self) -> &Arc<Buffer<T>> {
        &self.buffer
    }
}
