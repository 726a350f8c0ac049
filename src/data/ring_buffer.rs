//! Fixed-capacity byte ring with wraparound-aware pattern search.
//!
//! [`CircularBuffer`] is the staging area between the transport and the frame
//! reader. It owns a fixed backing array plus a head offset and a logical size;
//! every public index is a *logical* index (0 is the oldest unread byte) which is
//! mapped modulo the capacity onto the physical array. Searches walk logical
//! indices, so a delimiter split across the physical end of the array is found
//! exactly like one that is not.
//!
//! # Overflow policy
//!
//! Appending to a full buffer silently overwrites the oldest unread bytes. A
//! single append larger than the whole capacity keeps only its trailing
//! `capacity` bytes. Overflow is never an error: under sustained overload the
//! buffer favors the most recent data.
//!
//! ```text
//!  physical: [ y z w . . f x ]      head = 5, size = 5
//!  logical:    f x y z w            find_pattern(b"xy") == Some(1)
//! ```

use serde::Serialize;
use std::fmt;

/// Snapshot of buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferStats {
    /// Bytes currently stored
    pub size: usize,
    /// Fixed capacity in bytes
    pub capacity: usize,
    /// Bytes that can be appended before the oldest data is overwritten
    pub free_space: usize,
    /// Occupancy as a percentage of capacity (0.0 to 100.0)
    pub utilization: f64,
}

/// Fixed-capacity FIFO byte store that overwrites the oldest data on overflow.
pub struct CircularBuffer {
    storage: Box<[u8]>,
    head: usize,
    size: usize,
}

impl CircularBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    ///
    /// A capacity of zero is rounded up to one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            size: 0,
        }
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True when the next append will overwrite unread data.
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Bytes that can be appended without evicting anything.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.size
    }

    /// Occupancy as a percentage of capacity.
    pub fn utilization(&self) -> f64 {
        self.size as f64 / self.capacity() as f64 * 100.0
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            size: self.size,
            capacity: self.capacity(),
            free_space: self.free_space(),
            utilization: self.utilization(),
        }
    }

    #[inline]
    fn physical(&self, logical: usize) -> usize {
        (self.head + logical) % self.capacity()
    }

    #[inline]
    fn byte_at(&self, logical: usize) -> u8 {
        self.storage[self.physical(logical)]
    }

    /// Append bytes, evicting the oldest unread bytes if the ring overflows.
    pub fn append(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let data = if data.len() > capacity {
            &data[data.len() - capacity..]
        } else {
            data
        };
        if data.is_empty() {
            return;
        }

        let tail = self.physical(self.size);
        let first = (capacity - tail).min(data.len());
        self.storage[tail..tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.storage[..rest].copy_from_slice(&data[first..]);

        let total = self.size + data.len();
        if total > capacity {
            self.head = (self.head + (total - capacity)) % capacity;
            self.size = capacity;
        } else {
            self.size = total;
        }
    }

    /// Byte at a logical index, if present.
    pub fn at(&self, index: usize) -> Option<u8> {
        (index < self.size).then(|| self.byte_at(index))
    }

    /// Up to `n` bytes from the front, without consuming them.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        self.peek_range(0, n)
    }

    /// Up to `len` bytes starting at logical `offset`, without consuming them.
    pub fn peek_range(&self, offset: usize, len: usize) -> Vec<u8> {
        if offset >= self.size {
            return Vec::new();
        }
        let len = len.min(self.size - offset);
        let start = self.physical(offset);
        let first = (self.capacity() - start).min(len);

        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.storage[start..start + first]);
        out.extend_from_slice(&self.storage[..len - first]);
        out
    }

    /// Remove and return up to `n` bytes from the front.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let out = self.peek(n);
        self.discard(out.len());
        out
    }

    /// Drop up to `n` bytes from the front, returning how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.size);
        self.head = self.physical(n);
        self.size -= n;
        n
    }

    /// Unread content as two slices in logical order (the second is empty unless
    /// the content wraps).
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let first = (self.capacity() - self.head).min(self.size);
        (
            &self.storage[self.head..self.head + first],
            &self.storage[..self.size - first],
        )
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    /// Reallocate with a new capacity. Buffered bytes are dropped.
    pub fn set_capacity(&mut self, capacity: usize) {
        *self = Self::new(capacity);
    }

    fn search_is_degenerate(&self, pattern: &[u8], start: usize) -> bool {
        pattern.is_empty() || pattern.len() > self.size || start >= self.size
    }

    /// Logical offset of the first occurrence of `pattern` at or after `start`,
    /// using a byte-by-byte scan.
    pub fn find_pattern(&self, pattern: &[u8], start: usize) -> Option<usize> {
        if self.search_is_degenerate(pattern, start) {
            return None;
        }
        let last = self.size - pattern.len();
        (start..=last).find(|&i| {
            pattern
                .iter()
                .enumerate()
                .all(|(j, &b)| self.byte_at(i + j) == b)
        })
    }

    /// Same contract as [`find_pattern`](Self::find_pattern), in O(n + m) using
    /// the Knuth-Morris-Pratt failure table.
    pub fn find_pattern_kmp(&self, pattern: &[u8], start: usize) -> Option<usize> {
        if self.search_is_degenerate(pattern, start) {
            return None;
        }
        let failure = failure_table(pattern);
        let mut matched = 0usize;

        for i in start..self.size {
            let byte = self.byte_at(i);
            while matched > 0 && byte != pattern[matched] {
                matched = failure[matched - 1];
            }
            if byte == pattern[matched] {
                matched += 1;
            }
            if matched == pattern.len() {
                return Some(i + 1 - matched);
            }
        }
        None
    }

    /// Offsets of every occurrence of `pattern`, overlapping matches included.
    pub fn find_all(&self, pattern: &[u8]) -> Vec<usize> {
        let mut hits = Vec::new();
        let mut from = 0;
        while let Some(index) = self.find_pattern_kmp(pattern, from) {
            hits.push(index);
            from = index + 1;
        }
        hits
    }
}

/// Longest proper prefix that is also a suffix, for each prefix of `pattern`.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0usize; pattern.len()];
    let mut len = 0usize;
    for i in 1..pattern.len() {
        while len > 0 && pattern[i] != pattern[len] {
            len = table[len - 1];
        }
        if pattern[i] == pattern[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

impl fmt::Debug for CircularBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("size", &self.size)
            .finish()
    }
}
