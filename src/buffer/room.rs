//! Rooms for the raw buffers of USB receive transfers

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A free-list of raw receive buffers
///
/// The buffers of a room are not indexed by size. Every buffer taken from a device's room was
/// allocated for the same endpoint, so any buffer within the room is reused as is. The lock of a
/// room is only ever held for a push or a pop, which makes it safe to use from transfer
/// completions.
#[derive(Debug, Default)]
pub struct Room {
    free: Mutex<VecDeque<Vec<u8>>>,
}

impl Room {
    pub fn new() -> Self {
        Room::default()
    }

    /// Get a buffer for a transfer of `size` bytes
    ///
    /// The buffer at the head of the room is taken, otherwise a new buffer is allocated. A reused
    /// buffer is only grown when it is smaller than `size`, its content is never cleared.
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        match self.free.lock().pop_front() {
            Some(mut buffer) => {
                if buffer.len() < size {
                    buffer.resize(size, 0);
                }

                buffer
            }
            None => vec![0u8; size],
        }
    }

    /// Put a used buffer back into the room
    pub fn reuse(&self, buffer: Vec<u8>) {
        self.free.lock().push_back(buffer);
    }

    /// Free every buffer within the room
    ///
    /// The number of buffers freed is returned.
    pub fn purge(&self) -> usize {
        let mut free = self.free.lock();

        let count = free.len();

        free.clear();

        count
    }

    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.lock().is_empty()
    }
}
