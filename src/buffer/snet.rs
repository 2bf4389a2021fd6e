//! Small put/pull cursor buffers
//!
//! A `SnetBuffer` is the buffer used for HCI events and HCI commands. Bytes are *put* into the
//! buffer by a producer and *pulled* from it by a consumer, each side keeping its own cursor. The
//! buffer knows the size of the packet it is meant to hold (its *expected* size), so the producer
//! can tell when the packet is complete.

use core::fmt;

/// A buffer with separate put and pull cursors
///
/// The allocated size of a `SnetBuffer` never changes, but when the buffer is reused for a smaller
/// packet the expected size is lowered to the size of the new packet. The bytes of a reused buffer
/// are not cleared, so a buffer may contain stale bytes past the put cursor.
pub struct SnetBuffer {
    data: Box<[u8]>,
    expected: usize,
    putting: usize,
    pulling: usize,
}

impl SnetBuffer {
    /// Create a new `SnetBuffer` for a packet of `size` bytes
    pub fn new(size: usize) -> Self {
        SnetBuffer {
            data: vec![0u8; size].into_boxed_slice(),
            expected: size,
            putting: 0,
            pulling: 0,
        }
    }

    /// Create a `SnetBuffer` containing a complete packet
    pub fn from_packet(packet: &[u8]) -> Self {
        let mut buffer = SnetBuffer::new(packet.len());

        buffer.put(packet);

        buffer
    }

    /// Get the number of bytes allocated for the buffer
    pub fn allocated_size(&self) -> usize {
        self.data.len()
    }

    /// Get the expected size of the packet within this buffer
    pub fn size(&self) -> usize {
        self.expected
    }

    /// Put bytes into the buffer
    ///
    /// Bytes beyond the expected size are not put into the buffer. The return is the number of
    /// bytes taken from `bytes`.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        let len = core::cmp::min(self.remaining_to_put(), bytes.len());

        self.data[self.putting..self.putting + len].copy_from_slice(&bytes[..len]);

        self.putting += len;

        len
    }

    /// Pull up to `how_many` bytes from the buffer
    ///
    /// Only bytes that were put into the buffer can be pulled.
    pub fn pull(&mut self, how_many: usize) -> &[u8] {
        let start = self.pulling;

        let len = core::cmp::min(how_many, self.putting - self.pulling);

        self.pulling += len;

        &self.data[start..self.pulling]
    }

    /// Reset the cursors
    ///
    /// The content of the buffer is left as is.
    pub fn reset(&mut self) {
        self.putting = 0;
        self.pulling = 0;
    }

    /// Check if the put cursor has reached the expected size
    pub fn is_complete(&self) -> bool {
        self.putting == self.expected
    }

    /// Check if the pull cursor has reached the expected size
    pub fn is_finished(&self) -> bool {
        self.pulling == self.expected
    }

    pub fn remaining_to_put(&self) -> usize {
        self.expected - self.putting
    }

    pub fn remaining_to_pull(&self) -> usize {
        self.expected - self.pulling
    }

    pub fn put_cursor(&self) -> usize {
        self.putting
    }

    pub fn pull_cursor(&self) -> usize {
        self.pulling
    }

    /// Get the packet
    ///
    /// The returned slice is always `size()` bytes long, regardless of how many bytes were put.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.expected]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.expected]
    }

    /// Get the bytes that were put into the buffer
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.putting]
    }

    /// Prepare this buffer for a new packet of `size` bytes
    ///
    /// `size` must not be larger than the allocated size.
    pub(crate) fn reuse(&mut self, size: usize) {
        debug_assert!(size <= self.allocated_size());

        self.reset();

        self.expected = size;
    }
}

impl fmt::Debug for SnetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SnetBuffer")
            .field("allocated", &self.data.len())
            .field("expected", &self.expected)
            .field("putting", &self.putting)
            .field("pulling", &self.pulling)
            .finish()
    }
}
