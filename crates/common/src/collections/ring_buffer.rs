//! A fixed-capacity circular buffer with overwrite-on-full.
//!
//! Used for bounded audit trails and recovery history: the newest records
//! are always kept and memory never grows past the configured capacity.

use std::collections::VecDeque;

/// A fixed-capacity buffer storing elements oldest-first.
///
/// # Examples
///
/// ```rust
/// use toolmesh_common::collections::RingBuffer;
///
/// let mut buffer = RingBuffer::new(3);
/// buffer.push(1);
/// buffer.push(2);
/// buffer.push(3);
/// buffer.push(4); // overwrites the oldest item (`1`)
///
/// assert_eq!(buffer.to_vec(), vec![2, 3, 4]);
/// assert_eq!(buffer.recent(2), vec![3, 4]);
/// assert_eq!(buffer.overwritten(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
    overwritten: u64,
}

impl<T> RingBuffer<T> {
    /// Creates a new buffer with the provided capacity.
    ///
    /// A capacity of zero is clamped to `1`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity, overwritten: 0 }
    }

    /// Pushes an item, dropping the oldest one when full.
    pub fn push(&mut self, item: T) {
        if self.is_full() {
            let _ = self.buf.pop_front();
            self.overwritten += 1;
        }
        self.buf.push_back(item);
    }

    /// Removes and returns the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.buf.pop_front()
    }

    /// Item at `idx`, counting from the oldest.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.buf.get(idx)
    }

    /// Most recently pushed item.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Number of items currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when the buffer has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `true` when the next push will overwrite.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Maximum number of items held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many items have been dropped to make room since creation.
    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Removes all elements, leaving the capacity unchanged.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the contents, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }

    /// Copies at most `n` of the newest items, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.buf.len().saturating_sub(n);
        self.buf.iter().skip(skip).cloned().collect()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<'a, T> IntoIterator for &'a RingBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.buf.iter()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for collections::ring_buffer.
    use super::*;

    /// Validates overwrite-on-full ordering.
    ///
    /// Assertions:
    /// - Confirms the oldest element is dropped first.
    /// - Confirms `overwritten()` counts the drops.
    #[test]
    fn test_push_overwrites_oldest() {
        let mut buffer = RingBuffer::new(2);
        buffer.push('a');
        buffer.push('b');
        buffer.push('c');
        buffer.push('d');

        assert_eq!(buffer.to_vec(), vec!['c', 'd']);
        assert_eq!(buffer.overwritten(), 2);
        assert!(buffer.is_full());
        assert_eq!(buffer.last(), Some(&'d'));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.to_vec(), vec![2]);
    }

    /// Validates `recent` windows.
    ///
    /// Assertions:
    /// - Asking for more than stored returns everything.
    /// - Asking for fewer returns the newest tail, oldest first.
    #[test]
    fn test_recent() {
        let mut buffer = RingBuffer::new(5);
        for i in 0..4 {
            buffer.push(i);
        }

        assert_eq!(buffer.recent(10), vec![0, 1, 2, 3]);
        assert_eq!(buffer.recent(2), vec![2, 3]);
        assert!(buffer.recent(0).is_empty());
    }

    #[test]
    fn test_pop_and_clear() {
        let mut buffer = RingBuffer::new(3);
        buffer.push(1);
        buffer.push(2);

        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.len(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
    }
}
