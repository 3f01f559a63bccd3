/*!
In-memory doubly linked sequence of records.

Nodes live in an arena and link to each other by slot index, so eviction and
cursor movement are index updates. Freed slots are recycled.

The persistence cursor marks the last record already written to the backing
file. Records after it are pending; records up to and including it carry the
payload length they were written with.
*/

use crate::{Result, SpoolError};

/// Arena slot index of a node
pub type NodeId = usize;

#[derive(Debug)]
struct Node<T> {
    value: T,
    /// Payload length once flushed, zero if never persisted
    encoded_len: u64,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
pub struct LinkedSequence<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    cursor: Option<NodeId>,
    len: usize,
}

impl<T> Default for LinkedSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedSequence<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            cursor: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn alloc(&mut self, node: Node<T>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Node<T> {
        let node = self.slots[id].take().expect("released slot must be occupied");
        self.free.push(id);
        node
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        self.slots[id].as_ref().expect("linked slot must be occupied")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        self.slots[id].as_mut().expect("linked slot must be occupied")
    }

    pub fn push_front(&mut self, value: T) -> NodeId {
        let id = self.alloc(Node {
            value,
            encoded_len: 0,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(old) => self.node_mut(old).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
        id
    }

    pub fn push_back(&mut self, value: T) -> NodeId {
        let id = self.alloc(Node {
            value,
            encoded_len: 0,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(old) => self.node_mut(old).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Append a record that already exists in the backing file
    pub fn push_back_persisted(&mut self, value: T, encoded_len: u64) -> NodeId {
        let id = self.push_back(value);
        self.mark_persisted(id, encoded_len);
        id
    }

    pub fn peek_front(&self) -> Result<&T> {
        self.head
            .map(|id| &self.node(id).value)
            .ok_or(SpoolError::EmptyCollection)
    }

    pub fn peek_back(&self) -> Result<&T> {
        self.tail
            .map(|id| &self.node(id).value)
            .ok_or(SpoolError::EmptyCollection)
    }

    /// Persisted payload length of the head record, if any
    pub fn front_encoded_len(&self) -> Option<u64> {
        self.head.map(|id| self.node(id).encoded_len)
    }

    /// Persisted payload length of the tail record, if any
    pub fn back_encoded_len(&self) -> Option<u64> {
        self.tail.map(|id| self.node(id).encoded_len)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let id = self.head?;
        let node = self.release(id);

        self.head = node.next;
        match node.next {
            Some(next) => self.node_mut(next).prev = None,
            None => self.tail = None,
        }
        // Nothing flushed remains in memory once the cursor itself leaves.
        if self.cursor == Some(id) {
            self.cursor = None;
        }
        self.len -= 1;

        Some(node.value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let id = self.tail?;
        let node = self.release(id);

        self.tail = node.prev;
        match node.prev {
            Some(prev) => self.node_mut(prev).next = None,
            None => self.head = None,
        }
        if self.cursor == Some(id) {
            self.cursor = node.prev;
        }
        self.len -= 1;

        Some(node.value)
    }

    /// Drop every record and the cursor
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.len = 0;
    }

    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    /// First record not yet written to the backing file
    pub fn next_pending(&self) -> Option<NodeId> {
        match self.cursor {
            Some(id) => self.node(id).next,
            None => self.head,
        }
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    pub fn value(&self, id: NodeId) -> &T {
        &self.node(id).value
    }

    /// Forget what was written: every record becomes pending again
    pub fn mark_all_pending(&mut self) {
        for node in self.slots.iter_mut().flatten() {
            node.encoded_len = 0;
        }
        self.cursor = None;
    }

    /// Record the payload length `id` was written with and move the cursor to it
    pub fn mark_persisted(&mut self, id: NodeId, encoded_len: u64) {
        self.node_mut(id).encoded_len = encoded_len;
        self.cursor = Some(id);
    }

    /// Number of records after the cursor
    pub fn pending_count(&self) -> usize {
        let mut count = 0;
        let mut next = self.next_pending();
        while let Some(id) = next {
            count += 1;
            next = self.node(id).next;
        }
        count
    }

    /// Head-to-tail iteration
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            seq: self,
            next: self.head,
        }
    }
}

pub struct Iter<'a, T> {
    seq: &'a LinkedSequence<T>,
    next: Option<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.seq.node(id);
        self.next = node.next;
        Some(&node.value)
    }
}
