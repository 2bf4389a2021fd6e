//! HCI packet definitions used by the transport
//!
//! USB does not label the HCI packets it carries. The kind of packet is implied by the endpoint
//! (or control request) the packet travels through, so the driver only needs the packet types,
//! the sizes of the packet headers, and the maximum sizes of the packets it receives.

use core::fmt;

/// Size of the header of an HCI event packet (event code + parameter length)
pub const EVENT_HEADER_SIZE: usize = 2;

/// Size of the header of an HCI ACL data packet (handle and flags + data length)
pub const ACL_HEADER_SIZE: usize = 4;

/// Size of the header of an HCI command packet (opcode + parameter length)
pub const COMMAND_HEADER_SIZE: usize = 3;

/// The largest HCI command packet
pub const MAX_COMMAND_SIZE: usize = COMMAND_HEADER_SIZE + 255;

/// The HCI_Reset command
pub const RESET_COMMAND: [u8; COMMAND_HEADER_SIZE] = [0x03, 0x0c, 0x00];

/// The largest HCI event the driver expects to receive in one interrupt transfer
pub const MAX_EVENT_SIZE: usize = 260;

/// The largest ACL payload the driver expects
pub const MAX_ACL_SIZE: usize = 1024;

/// The largest ACL frame (header included) the driver expects to receive in one bulk transfer
pub const MAX_FRAME_SIZE: usize = MAX_ACL_SIZE + ACL_HEADER_SIZE;

/// The kind of an HCI packet
///
/// The raw values are the packet codes used between the driver and the upper layers.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketType {
    /// Command packet
    Command,
    /// Event Packet
    Event,
    /// Asynchronous Connection-Less Data Packet
    Acl,
    /// Synchronous Connection-Oriented Data Packet
    Sco,
}

impl PacketType {
    /// Get the raw code of the packet type
    pub fn code(self) -> u8 {
        match self {
            PacketType::Command => 0,
            PacketType::Event => 1,
            PacketType::Acl => 2,
            PacketType::Sco => 3,
        }
    }

    /// Check if packets of this type are sent from the host to the controller
    pub fn is_outgoing(self) -> bool {
        !matches!(self, PacketType::Event)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(PacketType::Command),
            1 => Ok(PacketType::Event),
            2 => Ok(PacketType::Acl),
            3 => Ok(PacketType::Sco),
            _ => Err(raw),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PacketType::Command => f.write_str("Command"),
            PacketType::Event => f.write_str("Event"),
            PacketType::Acl => f.write_str("ACL"),
            PacketType::Sco => f.write_str("SCO"),
        }
    }
}

/// A HCI packet
///
/// This is a wrapper around a buffer containing a HCI packet. `HciPacket` is used to describe what
/// kind of HCI packet is contained within the buffer.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum HciPacket<T> {
    Command(T),
    Event(T),
    Acl(T),
    Sco(T),
}

impl<T> HciPacket<T> {
    /// Get the type of the packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            HciPacket::Command(_) => PacketType::Command,
            HciPacket::Event(_) => PacketType::Event,
            HciPacket::Acl(_) => PacketType::Acl,
            HciPacket::Sco(_) => PacketType::Sco,
        }
    }
}

/// The identifier the upper HCI stack knows a device by
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HciId(pub u32);

impl fmt::Display for HciId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "hci{}", self.0)
    }
}

/// Get the total length of an event frame from its header
///
/// `None` is returned if `header` is shorter than an event header.
pub fn event_frame_len(header: &[u8]) -> Option<usize> {
    header.get(1).map(|len| EVENT_HEADER_SIZE + <usize>::from(*len))
}

/// Get the total length of an ACL frame from its header
///
/// `None` is returned if `header` is shorter than an ACL header.
pub fn acl_frame_len(header: &[u8]) -> Option<usize> {
    match header {
        [_, _, l0, l1, ..] => Some(ACL_HEADER_SIZE + <usize>::from(<u16>::from_le_bytes([*l0, *l1]))),
        _ => None,
    }
}

/// Pack the code of a message written to the userland port
///
/// The code carries the packet type within the top byte, the low byte of the HCI id in the next
/// byte, and 16 bits of extra data in the low half.
pub fn pack_port_code(packet_type: PacketType, hci_id: HciId, data: i32) -> i32 {
    let packed = (u32::from(packet_type.code()) << 24) | ((hci_id.0 & 0xFF) << 16) | (data as u32 & 0xFFFF);

    packed as i32
}

/// Unpack a code created by [`pack_port_code`]
pub fn unpack_port_code(code: i32) -> (u8, u8, u16) {
    let raw = code as u32;

    ((raw >> 24) as u8, (raw >> 16) as u8, raw as u16)
}
