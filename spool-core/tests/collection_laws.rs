/*!
Randomized checks of the FIFO/LIFO laws and of durability.

Every run drives a durable buffer and a `VecDeque` model with the same
operation stream, flushing at random points, and finally checks that a fresh
buffer recovered from the file matches the model.
*/

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spool_core::{Buffer, BufferOptions, Collection, Queue, Stack};
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    seq: u32,
    kind: String,
    payload: Vec<u8>,
}

fn event(rng: &mut StdRng, seq: u32) -> Event {
    let len = rng.gen_range(0..32);
    Event {
        seq,
        kind: ["open", "close", "tick"][rng.gen_range(0..3)].to_string(),
        payload: (0..len).map(|_| rng.gen()).collect(),
    }
}

fn durable(dir: &TempDir, name: &str) -> BufferOptions {
    BufferOptions::default()
        .with_backing_file(dir.path().join(name))
        .with_persistence(true)
        .with_recovery(true)
}

fn recover(options: &BufferOptions) -> Buffer<Event> {
    let buffer = Buffer::new(options);
    buffer.register_type();
    buffer.recover().unwrap();
    buffer
}

#[test]
fn test_queue_is_fifo() {
    let mut rng = StdRng::seed_from_u64(7);
    let queue: Queue<u32> = Queue::new();
    let values: Vec<u32> = (0..200).map(|_| rng.gen()).collect();

    for v in &values {
        queue.enqueue(*v);
    }
    let drained: Vec<u32> = (0..values.len()).map(|_| queue.dequeue().unwrap()).collect();

    assert_eq!(drained, values);
    assert!(queue.is_empty());
}

#[test]
fn test_stack_is_lifo() {
    let mut rng = StdRng::seed_from_u64(11);
    let stack: Stack<u32> = Stack::new();
    let values: Vec<u32> = (0..200).map(|_| rng.gen()).collect();

    for v in &values {
        stack.push(*v);
    }
    let drained: Vec<u32> = (0..values.len()).map(|_| stack.pop().unwrap()).collect();

    assert_eq!(drained, values.into_iter().rev().collect::<Vec<_>>());
}

#[test]
fn test_random_operations_survive_recovery() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = TempDir::new().unwrap();
        let options = durable(&dir, "laws");
        let buffer: Buffer<Event> = Buffer::new(&options);
        let mut model = VecDeque::new();

        for seq in 0..300 {
            match rng.gen_range(0..10) {
                0..=3 => {
                    let e = event(&mut rng, seq);
                    buffer.add_at_tail(e.clone());
                    model.push_back(e);
                }
                4..=5 => assert_eq!(buffer.remove_head().unwrap(), model.pop_front()),
                6..=7 => assert_eq!(buffer.remove_tail().unwrap(), model.pop_back()),
                _ => {
                    buffer.flush().unwrap();
                }
            }
            assert_eq!(buffer.len(), model.len());
        }
        buffer.flush().unwrap();

        let recovered = recover(&options);
        assert_eq!(
            recovered.values(),
            model.iter().cloned().collect::<Vec<_>>(),
            "seed {seed}"
        );
        assert_eq!(recovered.metadata().length, model.len() as u64);
    }
}

#[test]
fn test_retained_region_matches_live_records() {
    let dir = TempDir::new().unwrap();
    let options = durable(&dir, "region");
    let buffer: Buffer<String> = Buffer::new(&options);

    for word in ["alpha", "beta", "gamma", "delta"] {
        buffer.add_at_tail(word.to_string());
    }
    buffer.flush().unwrap();
    buffer.remove_head().unwrap();
    buffer.remove_tail().unwrap();

    // Two frames of 8-byte prefix plus quoted JSON string remain.
    let meta = buffer.metadata();
    let expected = (8 + "\"beta\"".len() + 8 + "\"gamma\"".len()) as u64;
    assert_eq!(meta.retained_bytes(), expected);

    buffer.remove_head().unwrap();
    buffer.remove_head().unwrap();
    let meta = buffer.metadata();
    assert_eq!(meta.file_start_offset, meta.file_end_offset);
    assert_eq!(meta.retained_bytes(), 0);
}

#[test]
fn test_shared_handles_see_one_buffer() {
    let buffer: Arc<Buffer<u8>> = Arc::new(Buffer::new(&BufferOptions::default()));
    let queue = Queue::from_buffer(Arc::clone(&buffer));
    let stack = Stack::from_buffer(buffer);

    queue.enqueue(1);
    stack.push(2);
    assert_eq!(queue.dequeue().unwrap(), 1);
    assert_eq!(stack.pop().unwrap(), 2);
    assert_eq!(queue.id(), stack.id());
}
