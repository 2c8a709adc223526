// src/engine/buffer.rs

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Max-priority buffer; equal priorities come out in insertion order.
#[derive(Debug)]
pub struct PriorityBuffer<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry<T> {
    priority: i32,
    seq: Reverse<u64>,
    item: T,
}

impl<T> Entry<T> {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, self.seq)
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl<T> Default for PriorityBuffer<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<T> PriorityBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T, priority: i32) {
        let seq = Reverse(self.next_seq);
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Empty the buffer, highest priority first.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            out.push(entry.item);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_first_fifo_among_equals() {
        let mut buf = PriorityBuffer::new();
        buf.push("low-a", 0);
        buf.push("high", 10);
        buf.push("low-b", 0);
        buf.push("neg", -5);
        buf.push("low-c", 0);

        assert_eq!(buf.len(), 5);
        assert_eq!(
            buf.drain_ordered(),
            vec!["high", "low-a", "low-b", "low-c", "neg"]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn order_survives_interleaved_pushes_after_drain() {
        let mut buf = PriorityBuffer::new();
        buf.push(1, 1);
        buf.drain_ordered();
        buf.push(2, 0);
        buf.push(3, 0);
        assert_eq!(buf.drain_ordered(), vec![2, 3]);
    }
}
