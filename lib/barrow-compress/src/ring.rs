//! Fixed-capacity byte FIFO.
//!
//! Producer appends at the tail, consumer takes from the head; the
//! buffer never grows. No internal synchronization — the owning
//! pipeline serializes access.

pub struct RingBuffer {
    buffer: Box<[u8]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Append as much of `bytes` as fits; returns the number accepted.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        let capacity = self.capacity();
        let count = bytes.len().min(self.free());
        let first = count.min(capacity - self.tail);
        self.buffer[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        let rest = count - first;
        self.buffer[..rest].copy_from_slice(&bytes[first..count]);
        self.tail = (self.tail + count) % capacity;
        self.len += count;
        count
    }

    /// Take up to `out.len()` bytes from the head; returns the number
    /// copied.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len);
        let capacity = self.capacity();
        let first = count.min(capacity - self.head);
        out[..first].copy_from_slice(&self.buffer[self.head..self.head + first]);
        let rest = count - first;
        out[first..count].copy_from_slice(&self.buffer[..rest]);
        self.discard(count);
        count
    }

    /// Contiguous run at the head, without consuming. May be shorter
    /// than `len()` when the data wraps; call again after
    /// [`discard`](Self::discard) for the remainder.
    pub fn head_slice(&self) -> &[u8] {
        let first = self.len.min(self.capacity() - self.head);
        &self.buffer[self.head..self.head + first]
    }

    /// Drop `count` bytes from the head.
    pub fn discard(&mut self, count: usize) {
        debug_assert!(count <= self.len);
        self.head = (self.head + count) % self.capacity();
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
            self.tail = 0;
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get_round_trip() {
        let mut ring = RingBuffer::with_capacity(8);
        assert_eq!(ring.put(b"abcde"), 5);
        let mut out = [0u8; 8];
        assert_eq!(ring.get(&mut out), 5);
        assert_eq!(&out[..5], b"abcde");
        assert!(ring.is_empty());
    }

    #[test]
    fn put_is_bounded_by_free_space() {
        let mut ring = RingBuffer::with_capacity(4);
        assert_eq!(ring.put(b"abcdef"), 4);
        assert!(ring.is_full());
        assert_eq!(ring.put(b"x"), 0);
        assert_eq!(ring.free(), 0);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let mut ring = RingBuffer::with_capacity(4);
        assert_eq!(ring.put(b"abc"), 3);
        let mut out = [0u8; 2];
        assert_eq!(ring.get(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(ring.put(b"def"), 3);
        let mut out = [0u8; 4];
        assert_eq!(ring.get(&mut out), 4);
        assert_eq!(&out, b"cdef");
    }

    #[test]
    fn head_slice_and_discard_drain_wrapped_data() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.put(b"abcd");
        let mut out = [0u8; 2];
        ring.get(&mut out);
        ring.put(b"ef");

        let mut drained = Vec::new();
        while !ring.is_empty() {
            let chunk = ring.head_slice().to_vec();
            assert!(!chunk.is_empty());
            ring.discard(chunk.len());
            drained.extend_from_slice(&chunk);
        }
        assert_eq!(drained, b"cdef");
    }
}
