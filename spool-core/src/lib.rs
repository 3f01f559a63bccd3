/*!
# Spool Core

In-process double-ended buffers that can mirror themselves into a single
append-only file and be rebuilt from it after a restart.

- [`Buffer`] is the engine: a linked sequence of records, a fixed-size
  metadata header and the backing file
- [`Registry`] keeps one live buffer per backing file and flushes each one
  on its own period in the background
- [`Queue`] and [`Stack`] are the FIFO and LIFO views over a buffer

## File layout

```text
[ header: 256 bytes ][ len u64 BE | JSON payload ][ len u64 BE | JSON payload ] ...
                    ^ file_start_offset                                       ^ file_end_offset
```

Bytes outside `[file_start_offset, file_end_offset)` are never read back.

## Usage

```rust,no_run
use spool_core::{BufferOptions, Collection, Queue, QueueRegistry};

let registry: QueueRegistry<String> = QueueRegistry::new();
let queue = Queue::open(
    &registry,
    BufferOptions::durable("/var/lib/app/jobs.spool"),
)?;

queue.enqueue("first".to_string());
queue.flush()?;
assert_eq!(queue.dequeue()?, "first");
# Ok::<(), spool_core::SpoolError>(())
```
*/

pub mod buffer;
pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod sequence;
pub mod stack;


pub use buffer::{read_metadata, Buffer, FlushReport};
pub use codec::Record;
pub use collection::Collection;
pub use config::{BufferOptions, DEFAULT_PERSISTENCE_PERIOD};
pub use error::{Result, SpoolError};
pub use metadata::{BufferMetadata, METADATA_SIZE};
pub use observability::{init_default_observability, init_observability};
pub use queue::Queue;
pub use registry::{
    BindStatus, Binding, Flavor, QueueFlavor, QueueRegistry, Registry, StackFlavor, StackRegistry,
};
pub use scheduler::Scheduler;
pub use stack::Stack;
