//! Per-segment retransmit deadlines.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  Rather than piggybacking that check on
//! the receive call timing out (which a steady stream of unrelated datagrams
//! can postpone indefinitely), every transmission pushes a deadline into a
//! [`DeadlineQueue`], and the connection loop consults the queue on every
//! iteration.
//!
//! The queue is lazy: entries are never removed when a segment is
//! acknowledged or re-sent early.  The owner checks each expired entry
//! against its own bookkeeping and skips the stale ones.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Min-heap of `(deadline, seq_num)` pairs.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(Instant, u32)>>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `seq_num` to be checked at `deadline`.
    pub fn schedule(&mut self, seq_num: u32, deadline: Instant) {
        self.heap.push(Reverse((deadline, seq_num)));
    }

    /// Earliest scheduled deadline, stale or not.
    pub fn peek(&self) -> Option<(Instant, u32)> {
        self.heap.peek().map(|Reverse(entry)| *entry)
    }

    /// Drop the earliest entry.
    pub fn pop(&mut self) -> Option<(Instant, u32)> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<u32> {
        let mut expired = Vec::new();
        while let Some(&Reverse((deadline, seq))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            expired.push(seq);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
