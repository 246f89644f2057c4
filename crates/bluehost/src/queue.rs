//! Packet queues shared between the transport callback and the poll loop
//!
//! All four traffic directions (inbound events, inbound data, outbound
//! commands, outbound data) move through these FIFOs. The producer side may
//! run in an interrupt-like context (the transport receive callback), so the
//! head/tail mutation is confined to a minimal mutex critical section.

use std::collections::VecDeque;
use std::sync::Mutex;

/// FIFO of variable-length byte buffers.
///
/// There is no depth bound: a producer that is never drained grows memory
/// without limit. Backpressure is an open risk accepted by the design, not
/// something this queue papers over.
#[derive(Debug, Default)]
pub struct PacketQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
}

impl PacketQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy `bytes` into a newly allocated buffer and append it
    pub fn enqueue(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.push_back(bytes.to_vec());
    }

    /// Append an already-allocated buffer, taking ownership of it
    pub fn enqueue_buffer(&self, buffer: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.push_back(buffer);
    }

    /// Detach and return the head buffer, or `None` if the queue is empty
    pub fn dequeue(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.pop_front()
    }

    /// Non-blocking peek: is there anything to dequeue?
    pub fn avail(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.is_empty()
    }

    /// Number of queued buffers
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.len()
    }

    /// True if no buffers are queued
    pub fn is_empty(&self) -> bool {
        !self.avail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dequeue_order() {
        let queue = PacketQueue::new();
        assert!(!queue.avail());
        assert!(queue.dequeue().is_none());

        queue.enqueue(&[1, 2, 3]);
        queue.enqueue_buffer(vec![4, 5]);
        assert!(queue.avail());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue(), Some(vec![1, 2, 3]));
        assert_eq!(queue.dequeue(), Some(vec![4, 5]));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_copies() {
        let queue = PacketQueue::new();
        let mut data = vec![0xAA, 0xBB];
        queue.enqueue(&data);
        data[0] = 0;
        assert_eq!(queue.dequeue(), Some(vec![0xAA, 0xBB]));
    }

    #[test]
    fn test_shared_between_threads() {
        use std::sync::Arc;

        let queue = Arc::new(PacketQueue::new());
        let producer = Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            for i in 0..100u8 {
                producer.enqueue(&[i]);
            }
        });

        handle.join().unwrap();

        let mut count = 0;
        while let Some(buf) = queue.dequeue() {
            assert_eq!(buf, vec![count]);
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
