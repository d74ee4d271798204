//! Receive buffer for one server TCB.
//!
//! Go-Back-N on the receive side:
//!
//! - Only the segment starting at `expected_seq` is accepted.
//! - Anything else is discarded without buffering; the caller re-sends the
//!   current cumulative ACK so the sender learns where to go back to.
//! - A segment that would overflow the buffer is discarded and **not**
//!   acknowledged, so the sender retries once the application drains it.
//!
//! No I/O here; [`crate::server`] sends the ACKs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVerdict {
    /// Appended; `expected_seq` advanced. Acknowledge.
    Accepted,
    /// Wrong sequence number. Re-acknowledge the current expectation.
    OutOfOrder,
    /// No room. Do not acknowledge.
    Overflow,
}

#[derive(Debug)]
pub struct RecvBuffer {
    expected_seq: u32,
    buf: Vec<u8>,
    capacity: usize,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            expected_seq: 0,
            buf: Vec::new(),
            capacity,
        }
    }

    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> DataVerdict {
        if seq != self.expected_seq {
            return DataVerdict::OutOfOrder;
        }
        if self.buf.len() + payload.len() > self.capacity {
            return DataVerdict::Overflow;
        }
        self.buf.extend_from_slice(payload);
        self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u32);
        DataVerdict::Accepted
    }

    /// Next byte offset expected from the peer; what a DATAACK announces.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }

    /// Start a fresh stream (new connection on this TCB).
    pub fn reset(&mut self) {
        self.expected_seq = 0;
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and return the first `n` buffered bytes. The remainder shifts
    /// to the front.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.buf.len());
        self.buf.drain(..n).collect()
    }
}
