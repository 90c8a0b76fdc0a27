//! A buffer for bytes that arrive from the network in irregular segments.
//!
//! The `ChunkBuffer` is a first-in, first-out queue of byte segments in
//! arrival order. It hides segmentation from its callers: bytes can be
//! consumed in amounts that have nothing to do with how they arrived.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// A FIFO queue of received byte segments with a running total length.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    segments: VecDeque<Bytes>,
    len: usize,
}

impl ChunkBuffer {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment received from the transport.
    pub fn push(&mut self, segment: Bytes) {
        if !segment.is_empty() {
            self.len += segment.len();
            self.segments.push_back(segment);
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn available(&self) -> usize {
        self.len
    }

    /// Remove and return exactly `n` bytes from the front of the buffer.
    ///
    /// When the front segment covers the request, the returned bytes are a
    /// cheap slice of it and nothing is copied. Callers must check
    /// [`available`](Self::available) first: asking for more than is
    /// buffered is a bug in the caller and panics.
    pub fn consume_exact(&mut self, n: usize) -> Bytes {
        match self.take_front(n) {
            Some(taken) => taken,
            None => self.consume_spanning(n),
        }
    }

    /// Remove and return exactly `n` bytes, assembling them from as many
    /// leading segments as needed.
    ///
    /// Fully consumed segments are dropped from the queue; a partially
    /// consumed one is truncated in place. The same availability rule as
    /// [`consume_exact`](Self::consume_exact) applies.
    pub fn consume_spanning(&mut self, n: usize) -> Bytes {
        assert!(n <= self.len, "Bug: consuming {} bytes with only {} buffered", n, self.len);
        if let Some(taken) = self.take_front(n) {
            return taken;
        }
        let mut assembled = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let mut front =
                self.segments.pop_front().expect("Bug: segment queue ran dry mid-consume");
            if front.len() > remaining {
                assembled.extend_from_slice(&front.split_to(remaining));
                self.segments.push_front(front);
                remaining = 0;
            } else {
                remaining -= front.len();
                assembled.extend_from_slice(&front);
            }
        }
        self.len -= n;
        assembled.freeze()
    }

    /// Front-segment fast path: slice off `n` bytes without copying, or
    /// report that the front segment does not cover the request.
    fn take_front(&mut self, n: usize) -> Option<Bytes> {
        assert!(n <= self.len, "Bug: consuming {} bytes with only {} buffered", n, self.len);
        let front = self.segments.front_mut()?;
        if front.len() < n {
            return None;
        }
        let taken = if front.len() == n {
            self.segments.pop_front().expect("Bug: front segment vanished")
        } else {
            front.split_to(n)
        };
        self.len -= n;
        Some(taken)
    }
}
