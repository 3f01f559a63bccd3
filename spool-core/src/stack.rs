//! LIFO facade: push and pop at the tail.

use std::path::Path;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::codec::Record;
use crate::collection::Collection;
use crate::config::BufferOptions;
use crate::registry::{BindStatus, StackRegistry};
use crate::{Result, SpoolError};

/// A last-in first-out handle over a shared buffer
///
/// Destroying a stack through its registry deletes the backing file, unlike
/// a queue.
#[derive(Debug, Clone)]
pub struct Stack<T: Record> {
    buffer: Arc<Buffer<T>>,
}

impl<T: Record> Stack<T> {
    /// In-memory stack, not registered anywhere
    pub fn new() -> Self {
        Self::from_buffer(Arc::new(Buffer::new(&BufferOptions::default())))
    }

    pub fn from_buffer(buffer: Arc<Buffer<T>>) -> Self {
        Self { buffer }
    }

    /// Bind through `registry`, returning the live stack if the path is taken
    pub fn open(registry: &StackRegistry<T>, options: BufferOptions) -> Result<Self> {
        Ok(Self::from_buffer(registry.bind(options)?.buffer))
    }

    /// Durable lookup-or-create on `path`
    pub fn get<P: AsRef<Path>>(registry: &StackRegistry<T>, path: P) -> Result<Self> {
        Ok(Self::from_buffer(registry.get(path)?))
    }

    pub fn push(&self, value: T) {
        self.buffer.add_at_tail(value);
    }

    pub fn pop(&self) -> Result<T> {
        self.buffer
            .remove_tail()?
            .ok_or(SpoolError::EmptyCollection)
    }

    /// Most recently pushed value, left in place
    pub fn tail(&self) -> Result<T> {
        self.buffer.peek_tail()
    }

    /// Give this stack a backing file; see [`StackRegistry::attach`]
    pub fn attach<P: AsRef<Path>>(
        &self,
        registry: &StackRegistry<T>,
        path: P,
    ) -> Result<BindStatus> {
        registry.attach(&self.buffer, path)
    }

    /// Force this handle onto `path`; it may now point at a different buffer
    pub fn rebind<P: AsRef<Path>>(
        &mut self,
        registry: &StackRegistry<T>,
        path: P,
    ) -> Result<BindStatus> {
        let binding = registry.rebind(&self.buffer, path)?;
        self.buffer = binding.buffer;
        Ok(binding.status)
    }
}

impl<T: Record> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> for Stack<T> {
    fn buffer(&self) -> &Arc<Buffer<T>> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use tempfile::TempDir;

    fn filled() -> Stack<i32> {
        let stack = Stack::new();
        for v in 1..=4 {
            stack.push(v);
        }
        stack
    }

    #[test]
    fn test_new_empty_stack() {
        let stack: Stack<i32> = Stack::new();
        assert!(stack.is_empty());
        assert!(matches!(stack.pop(), Err(SpoolError::EmptyCollection)));
        assert!(matches!(stack.tail(), Err(SpoolError::EmptyCollection)));
    }

    #[test]
    fn test_tail_does_not_remove() {
        let stack = filled();
        assert_eq!(stack.tail().unwrap(), 4);
        assert_eq!(stack.tail().unwrap(), 4);
        assert_eq!(stack.len(), 4);
    }

    #[test]
    fn test_pop() {
        let stack = filled();
        assert_eq!(stack.pop().unwrap(), 4);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.pop().unwrap(), 3);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_push_pop_flush_recover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("periodically");

        let registry: StackRegistry<i32> = Registry::new();
        let stack = Stack::open(
            &registry,
            BufferOptions::default()
                .with_backing_file(&path)
                .with_persistence(true),
        )
        .unwrap();

        stack.push(1);
        stack.push(3);
        stack.push(5);
        assert_eq!(stack.pop().unwrap(), 5);
        stack.push(7);
        stack.push(9);
        assert_eq!(stack.pop().unwrap(), 9);
        stack.flush().unwrap();

        let fresh: StackRegistry<i32> = Registry::new();
        let recovered = Stack::open(
            &fresh,
            BufferOptions::default()
                .with_backing_file(&path)
                .with_recovery(true),
        )
        .unwrap();

        assert_eq!(recovered.len(), 3);
        assert_eq!(recovered.pop().unwrap(), 7);
        assert_eq!(recovered.pop().unwrap(), 3);
        assert_eq!(recovered.pop().unwrap(), 1);
    }

    #[test]
    fn test_pop_after_flush_shrinks_file_region() {
        let dir = TempDir::new().unwrap();
        let registry: StackRegistry<i32> = Registry::new();
        let stack = Stack::get(&registry, dir.path().join("shrink")).unwrap();

        stack.push(1);
        stack.push(2);
        stack.flush().unwrap();
        let before = stack.buffer().metadata();

        assert_eq!(stack.pop().unwrap(), 2);
        let after = stack.buffer().metadata();
        assert_eq!(after.file_end_offset, before.file_end_offset - 9);
        assert_eq!(after.file_start_offset, before.file_start_offset);
    }
}
