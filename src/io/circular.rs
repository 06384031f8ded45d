//! Fixed-capacity latest-wins handoff buffer
//!
//! One [`CircularBuffer`] per device name carries messages from the worker
//! thread (producer) to the application thread (consumer). Three
//! pre-allocated slots are enough for the discipline: one may be under read,
//! one under write, one holds the last completed message.
//!
//! This is deliberately not a queue. A slow consumer observes only the most
//! recently completed message; intermediate messages are overwritten. For
//! streaming sensor and image data only the newest sample matters, and the
//! bound keeps memory constant no matter how far the consumer falls behind.
//!
//! The index mutex is held only for pointer bookkeeping. Slot contents are
//! filled and read under per-slot locks, so socket I/O never happens inside
//! the index lock.

use std::sync::{Mutex, MutexGuard};

use crate::io::lock;
use crate::protocol::frame::FramedMessage;

const CAPACITY: usize = 3;

#[derive(Debug, Default)]
struct Indices {
    write: Option<usize>,
    read: Option<usize>,
    last_completed: Option<usize>,
    updated: bool,
}

/// Three-slot single-producer/single-consumer message buffer
#[derive(Debug, Default)]
pub struct CircularBuffer {
    indices: Mutex<Indices>,
    slots: [Mutex<FramedMessage>; CAPACITY],
}

impl CircularBuffer {
    /// Create a buffer with empty pre-allocated slots
    pub fn new() -> Self {
        CircularBuffer::default()
    }

    /// Open a slot for writing and return its index
    ///
    /// Picks the slot after the last completed one, skipping the slot
    /// currently under read. Calling again while a push is open returns the
    /// same index; the in-progress slot is never lost.
    pub fn start_push(&self) -> usize {
        let mut ix = lock(&self.indices);
        if let Some(w) = ix.write {
            return w;
        }
        let mut next = match ix.last_completed {
            Some(i) => (i + 1) % CAPACITY,
            None => 0,
        };
        if ix.read == Some(next) {
            next = (next + 1) % CAPACITY;
        }
        ix.write = Some(next);
        next
    }

    /// Mutable lease on the slot opened by [`start_push`](Self::start_push)
    ///
    /// `None` when no push is open.
    pub fn push_slot(&self) -> Option<MutexGuard<'_, FramedMessage>> {
        let w = lock(&self.indices).write?;
        Some(lock(&self.slots[w]))
    }

    /// Publish the slot filled since [`start_push`](Self::start_push)
    ///
    /// This is the publication point: consumers can only observe a slot
    /// after its `end_push`. No-op when no push is open.
    pub fn end_push(&self) {
        let mut ix = lock(&self.indices);
        if let Some(w) = ix.write.take() {
            ix.last_completed = Some(w);
            ix.updated = true;
        }
    }

    /// Open the last completed slot for reading and return its index
    ///
    /// Clears the updated flag. `None` when nothing has ever been published.
    pub fn start_pull(&self) -> Option<usize> {
        let mut ix = lock(&self.indices);
        ix.updated = false;
        ix.read = ix.last_completed;
        ix.read
    }

    /// Lease on the slot opened by [`start_pull`](Self::start_pull)
    pub fn pull_slot(&self) -> Option<MutexGuard<'_, FramedMessage>> {
        let r = lock(&self.indices).read?;
        Some(lock(&self.slots[r]))
    }

    /// Release the slot held since [`start_pull`](Self::start_pull)
    pub fn end_pull(&self) {
        lock(&self.indices).read = None;
    }

    /// Whether a message has completed since the last [`start_pull`](Self::start_pull)
    pub fn is_updated(&self) -> bool {
        lock(&self.indices).updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_message(buffer: &CircularBuffer, body: &[u8]) {
        buffer.start_push();
        {
            let mut slot = buffer.push_slot().unwrap();
            slot.initialize_for_receive();
            slot.allocate_body(body.len()).unwrap();
            slot.body_mut().copy_from_slice(body);
        }
        buffer.end_push();
    }

    #[test]
    fn test_pull_before_any_push() {
        let buffer = CircularBuffer::new();
        assert!(!buffer.is_updated());
        assert_eq!(buffer.start_pull(), None);
        assert!(buffer.pull_slot().is_none());
    }

    #[test]
    fn test_latest_wins() {
        let buffer = CircularBuffer::new();
        for i in 0..5u8 {
            push_message(&buffer, &[i; 8]);
        }
        assert!(buffer.is_updated());

        buffer.start_pull().unwrap();
        let body = buffer.pull_slot().unwrap().body().to_vec();
        buffer.end_pull();

        assert_eq!(body, vec![4u8; 8]);
        assert!(!buffer.is_updated());
    }

    #[test]
    fn test_push_never_selects_slot_under_read() {
        let buffer = CircularBuffer::new();
        push_message(&buffer, b"first");

        let read_index = buffer.start_pull().unwrap();
        // reader holds the slot open across many producer cycles
        for i in 0..10u8 {
            let write_index = buffer.start_push();
            assert_ne!(write_index, read_index, "cycle {i} collided with reader");
            {
                let mut slot = buffer.push_slot().unwrap();
                slot.initialize_for_receive();
                slot.allocate_body(1).unwrap();
                slot.body_mut()[0] = i;
            }
            buffer.end_push();
        }
        assert_eq!(buffer.pull_slot().unwrap().body(), b"first");
        buffer.end_pull();
    }

    #[test]
    fn test_start_push_is_idempotent() {
        let buffer = CircularBuffer::new();
        let a = buffer.start_push();
        let b = buffer.start_push();
        assert_eq!(a, b);
        buffer.end_push();
        let c = buffer.start_push();
        assert_ne!(a, c);
    }

    #[test]
    fn test_unpublished_push_is_invisible() {
        let buffer = CircularBuffer::new();
        push_message(&buffer, b"good");

        // a push that is never completed (e.g. CRC failure) stays unpublished
        buffer.start_push();
        {
            let mut slot = buffer.push_slot().unwrap();
            slot.initialize_for_receive();
            slot.allocate_body(3).unwrap();
            slot.body_mut().copy_from_slice(b"bad");
        }
        // no end_push

        buffer.start_pull().unwrap();
        assert_eq!(buffer.pull_slot().unwrap().body(), b"good");
        buffer.end_pull();
    }

    #[test]
    fn test_cross_thread_handoff() {
        use std::sync::Arc;

        let buffer = Arc::new(CircularBuffer::new());
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    push_message(&buffer, &[i; 4]);
                }
            })
        };
        producer.join().unwrap();

        buffer.start_pull().unwrap();
        assert_eq!(buffer.pull_slot().unwrap().body(), &[99u8; 4]);
        buffer.end_pull();
    }
}
