//! The recycling list of `SnetBuffer`s
//!
//! Buffers for events and commands are parked in a `RecycleList` once they are no longer used,
//! and fetched out of it the next time a buffer is needed.

use super::SnetBuffer;

/// A list of parked `SnetBuffer`s ordered by their allocated size
///
/// Keeping the list ordered from the smallest to the largest buffer makes the first buffer large
/// enough for a fetch also the one that wastes the least memory.
#[derive(Debug, Default)]
pub struct RecycleList {
    parked: Vec<SnetBuffer>,
}

impl RecycleList {
    pub fn new() -> Self {
        RecycleList::default()
    }

    /// Fetch a buffer for a packet of `size` bytes
    ///
    /// The first parked buffer with an allocated size of at least `size` is taken out of the list
    /// and reset for the new packet. Only the cursors and the expected size are reset, the bytes of
    /// the buffer are whatever the last user left in it. When no parked buffer is large enough a new
    /// buffer of exactly `size` bytes is created.
    pub fn fetch(&mut self, size: usize) -> SnetBuffer {
        match self.parked.iter().position(|buffer| buffer.allocated_size() >= size) {
            Some(index) => {
                let mut buffer = self.parked.remove(index);

                buffer.reuse(size);

                buffer
            }
            None => SnetBuffer::new(size),
        }
    }

    /// Park a buffer
    ///
    /// The buffer is placed before the first parked buffer that is larger than it.
    pub fn park(&mut self, buffer: SnetBuffer) {
        let index = self
            .parked
            .iter()
            .position(|parked| parked.allocated_size() > buffer.allocated_size())
            .unwrap_or(self.parked.len());

        self.parked.insert(index, buffer);
    }

    /// Free every parked buffer
    ///
    /// The number of buffers freed is returned.
    pub fn purge(&mut self) -> usize {
        let count = self.parked.len();

        self.parked.clear();

        count
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// Iterate over the allocated sizes of the parked buffers
    pub fn capacities(&self) -> impl Iterator<Item = usize> + '_ {
        self.parked.iter().map(SnetBuffer::allocated_size)
    }
}
