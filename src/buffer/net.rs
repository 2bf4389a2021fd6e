//! Network buffers for ACL data
//!
//! ACL frames are carried in `NetBuffer`s. They are created fresh for every frame and dropped once
//! they are given away (upward to the HCI stack, or downward to the USB bus).

use crate::hci::PacketType;
use core::fmt;

/// A growable buffer tagged with the HCI packet type it carries
#[derive(Clone, PartialEq, Eq)]
pub struct NetBuffer {
    protocol: PacketType,
    data: Vec<u8>,
}

impl NetBuffer {
    /// Create an empty buffer with room for `capacity` bytes
    pub fn with_capacity(protocol: PacketType, capacity: usize) -> Self {
        NetBuffer {
            protocol,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Create a buffer containing a complete packet
    pub fn from_packet<T: Into<Vec<u8>>>(protocol: PacketType, packet: T) -> Self {
        NetBuffer {
            protocol,
            data: packet.into(),
        }
    }

    /// Get the packet type this buffer is tagged with
    pub fn protocol(&self) -> PacketType {
        self.protocol
    }

    /// Append bytes to the end of the buffer
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NetBuffer")
            .field("protocol", &self.protocol)
            .field("len", &self.data.len())
            .finish()
    }
}
