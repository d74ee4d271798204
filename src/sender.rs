//! Go-Back-N send queue for one client TCB.
//!
//! [`SendQueue`] holds every DATA segment the application has handed over
//! and not yet seen acknowledged, in sequence order:
//!
//! ```text
//!  front                    unsent                      back
//!    │                        │                           │
//!    ▼                        ▼                           ▼
//!  ┌────┬────┬────┬────┬─────┬────┬────┬────┬───────────┐
//!  │sent│sent│sent│... │sent │new │new │new │ ...       │
//!  └────┴────┴────┴────┴─────┴────┴────┴────┴───────────┘
//!    <─── in flight (≤ window) ─>
//! ```
//!
//! - Acknowledgements are **cumulative**: an ACK carrying `K` releases every
//!   in-flight segment whose sequence number is below `K`.
//! - When the oldest in-flight segment has waited longer than the data
//!   timeout, the caller resends **all** in-flight segments (go back N).
//! - Sequence numbers are byte offsets starting at zero for each connection.
//!
//! This module only manages state; the drainer in [`crate::client`] does the
//! I/O.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::segment::Segment;
use crate::Port;

/// `a < b` in wrap-around sequence space.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) <= (u32::MAX / 2)
}

// ---------------------------------------------------------------------------
// SendEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SendEntry {
    pub segment: Segment,
    /// Time of the most recent transmission; `None` until first sent.
    pub sent_at: Option<Instant>,
    pub tx_count: u32,
}

// ---------------------------------------------------------------------------
// SendQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SendQueue {
    entries: VecDeque<SendEntry>,
    /// Index of the first never-sent entry.
    unsent: usize,
    /// Sequence number for the next enqueued byte.
    next_seq: u32,
    window: usize,
}

impl SendQueue {
    pub fn new(window: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            unsent: 0,
            next_seq: 0,
            window: window.max(1),
        }
    }

    /// Append a DATA segment carrying `payload`.
    pub fn enqueue(&mut self, src_port: Port, dest_port: Port, payload: Vec<u8>) {
        let len = payload.len() as u32;
        self.entries.push_back(SendEntry {
            segment: Segment::data(src_port, dest_port, self.next_seq, payload),
            sent_at: None,
            tx_count: 0,
        });
        self.next_seq = self.next_seq.wrapping_add(len);
    }

    /// Mark never-sent segments as sent, up to the window limit, and return
    /// copies for transmission.
    pub fn release_unsent(&mut self, now: Instant) -> Vec<Segment> {
        let mut out = Vec::new();
        while self.unsent < self.entries.len() && self.unsent < self.window {
            let e = &mut self.entries[self.unsent];
            e.sent_at = Some(now);
            e.tx_count += 1;
            out.push(e.segment.clone());
            self.unsent += 1;
        }
        out
    }

    /// Apply a cumulative acknowledgement. Returns the number of segments
    /// released.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        let mut released = 0;
        while self.unsent > 0 {
            match self.entries.front() {
                Some(front) if seq_lt(front.segment.header.seq_num, ack) => {
                    self.entries.pop_front();
                    self.unsent -= 1;
                    released += 1;
                }
                _ => break,
            }
        }
        released
    }

    /// `true` when the oldest in-flight segment has waited at least `timeout`.
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.entries
            .front()
            .and_then(|e| e.sent_at)
            .is_some_and(|t| now.saturating_duration_since(t) >= timeout)
    }

    /// Refresh every in-flight segment's send time and return copies of them
    /// in sequence order.
    pub fn retransmit(&mut self, now: Instant) -> Vec<Segment> {
        self.entries
            .iter_mut()
            .take(self.unsent)
            .map(|e| {
                e.sent_at = Some(now);
                e.tx_count += 1;
                e.segment.clone()
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.unsent
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SendEntry> {
        self.entries.iter()
    }

    /// Forget every queued segment. Sequence numbering continues.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unsent = 0;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(window: usize, sizes: &[usize]) -> SendQueue {
        let mut q = SendQueue::new(window);
        for &n in sizes {
            q.enqueue(1, 2, vec![0u8; n]);
        }
        q
    }

    #[test]
    fn enqueue_assigns_byte_offsets() {
        let q = queue_with(4, &[1464, 1464, 72]);
        let seqs: Vec<u32> = q.entries().map(|e| e.segment.header.seq_num).collect();
        assert_eq!(seqs, vec![0, 1464, 2928]);
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn release_respects_window() {
        let mut q = queue_with(2, &[5, 5, 5]);
        let now = Instant::now();
        assert_eq!(q.release_unsent(now).len(), 2);
        assert_eq!(q.in_flight(), 2);
        assert!(q.release_unsent(now).is_empty());
    }

    #[test]
    fn cumulative_ack_releases_and_opens_window() {
        let mut q = queue_with(2, &[5, 5, 5]);
        let now = Instant::now();
        q.release_unsent(now);

        assert_eq!(q.on_ack(10), 2);
        assert_eq!(q.in_flight(), 0);
        let next = q.release_unsent(now);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].header.seq_num, 10);
    }

    #[test]
    fn stale_and_duplicate_acks_release_nothing() {
        let mut q = queue_with(4, &[5, 5]);
        q.release_unsent(Instant::now());
        assert_eq!(q.on_ack(0), 0);
        assert_eq!(q.on_ack(5), 1);
        assert_eq!(q.on_ack(5), 0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn ack_never_releases_unsent_segments() {
        let mut q = queue_with(1, &[5, 5]);
        q.release_unsent(Instant::now());
        assert_eq!(q.on_ack(10), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn timeout_triggers_full_window_retransmit() {
        let mut q = queue_with(3, &[5, 5, 5, 5]);
        let t0 = Instant::now();
        q.release_unsent(t0);

        let timeout = Duration::from_millis(100);
        assert!(!q.timed_out(t0, timeout));
        let later = t0 + timeout;
        assert!(q.timed_out(later, timeout));

        let resent = q.retransmit(later);
        let seqs: Vec<u32> = resent.iter().map(|s| s.header.seq_num).collect();
        assert_eq!(seqs, vec![0, 5, 10]);
        assert!(!q.timed_out(later, timeout));
        assert!(q.entries().take(3).all(|e| e.tx_count == 2));
    }

    #[test]
    fn empty_queue_never_times_out() {
        let q = SendQueue::new(4);
        assert!(!q.timed_out(Instant::now(), Duration::ZERO));
    }

    #[test]
    fn seq_comparison_wraps() {
        assert!(seq_lt(u32::MAX - 1, 3));
        assert!(!seq_lt(3, u32::MAX - 1));
        assert!(!seq_lt(7, 7));
    }
}
