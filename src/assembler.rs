//! Reassembly of HCI packets from USB transfers
//!
//! The payload of a USB transfer has no relation to the boundaries of the HCI packets it carries.
//! A single transfer can hold part of a packet, exactly one packet, or the end of one packet
//! followed by the start of the next. A `FrameAssembler` buffers these chunks until they form a
//! complete HCI packet, using the length field within the packet's header to know when the packet
//! is complete.
//!
//! Each receiving channel (events and ACL data) has exactly one slot for the frame being assembled.
//! A new frame is only started once the slot is empty, so frames of a channel are always assembled
//! one after the other.

use crate::buffer::{NetBuffer, SnetBuffer};
use crate::hci::{self, PacketType};
use crate::{Error, Result};

/// A complete HCI packet received from the controller
#[derive(Debug)]
pub enum Frame {
    Event(SnetBuffer),
    Acl(NetBuffer),
}

impl Frame {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Frame::Event(_) => PacketType::Event,
            Frame::Acl(_) => PacketType::Acl,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Frame::Event(buffer) => buffer.filled(),
            Frame::Acl(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// The assembly state of a channel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssemblyState {
    /// No frame is being assembled
    Idle,
    /// A frame is partially assembled
    Assembling { received: usize, expected: usize },
}

struct AclFrame {
    buffer: NetBuffer,
    expected: usize,
}

/// Assembler of HCI event and ACL frames
#[derive(Default)]
pub struct FrameAssembler {
    event: Option<SnetBuffer>,
    acl: Option<AclFrame>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler::default()
    }

    /// Feed a chunk of received bytes to the assembler of a channel
    ///
    /// The bytes of `chunk` are appended to the frame in progress, or start a new frame when the
    /// channel is idle. Every frame completed by the chunk is given to `post`, and any bytes left
    /// over after a frame completes are used to start the next frame. Input `fetch` is called to
    /// get the buffer of a new event frame; ACL frames always get a new `NetBuffer`.
    ///
    /// The return is the number of frames completed.
    ///
    /// # Error
    /// When a new frame is started by a chunk shorter than the header of the frame, the chunk is
    /// dropped and an `IllegalSequence` error is returned. The channel is left idle.
    ///
    /// # Panic
    /// Only `Event` and `Acl` frames are received through an assembler, any other packet type
    /// causes a panic.
    pub fn assemble<F, P>(
        &mut self,
        packet_type: PacketType,
        mut chunk: &[u8],
        mut fetch: F,
        mut post: P,
    ) -> Result<usize>
    where
        F: FnMut(usize) -> SnetBuffer,
        P: FnMut(Frame),
    {
        let mut completed = 0;

        while !chunk.is_empty() {
            let (taken, frame) = match packet_type {
                PacketType::Event => self.assemble_event(chunk, &mut fetch)?,
                PacketType::Acl => self.assemble_acl(chunk)?,
                PacketType::Command | PacketType::Sco => {
                    panic!("{} frames cannot be received through the frame assembler", packet_type)
                }
            };

            if let Some(frame) = frame {
                completed += 1;

                post(frame);
            }

            chunk = &chunk[taken..];
        }

        Ok(completed)
    }

    fn assemble_event<F>(&mut self, chunk: &[u8], fetch: &mut F) -> Result<(usize, Option<Frame>)>
    where
        F: FnMut(usize) -> SnetBuffer,
    {
        let mut buffer = match self.event.take() {
            Some(buffer) => buffer,
            None => {
                let len = hci::event_frame_len(chunk).ok_or(Error::IllegalSequence(PacketType::Event))?;

                fetch(len)
            }
        };

        let taken = buffer.put(chunk);

        if buffer.is_complete() {
            Ok((taken, Some(Frame::Event(buffer))))
        } else {
            self.event = Some(buffer);

            Ok((taken, None))
        }
    }

    fn assemble_acl(&mut self, chunk: &[u8]) -> Result<(usize, Option<Frame>)> {
        let mut frame = match self.acl.take() {
            Some(frame) => frame,
            None => {
                let expected = hci::acl_frame_len(chunk).ok_or(Error::IllegalSequence(PacketType::Acl))?;

                AclFrame {
                    buffer: NetBuffer::with_capacity(PacketType::Acl, expected),
                    expected,
                }
            }
        };

        let taken = core::cmp::min(chunk.len(), frame.expected - frame.buffer.len());

        frame.buffer.append(&chunk[..taken]);

        if frame.buffer.len() == frame.expected {
            Ok((taken, Some(Frame::Acl(frame.buffer))))
        } else {
            self.acl = Some(frame);

            Ok((taken, None))
        }
    }

    /// Get the assembly state of a channel
    pub fn state(&self, packet_type: PacketType) -> AssemblyState {
        let progress = match packet_type {
            PacketType::Event => self.event.as_ref().map(|b| (b.put_cursor(), b.size())),
            PacketType::Acl => self.acl.as_ref().map(|f| (f.buffer.len(), f.expected)),
            PacketType::Command | PacketType::Sco => None,
        };

        match progress {
            Some((received, expected)) => AssemblyState::Assembling { received, expected },
            None => AssemblyState::Idle,
        }
    }

    /// Drop every frame in progress
    ///
    /// The number of dropped frames is returned.
    pub fn reset(&mut self) -> usize {
        usize::from(self.event.take().is_some()) + usize::from(self.acl.take().is_some())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::RecycleList;

    fn feed(assembler: &mut FrameAssembler, packet_type: PacketType, chunk: &[u8]) -> (Result<usize>, Vec<Vec<u8>>) {
        let mut frames = Vec::new();

        let result = assembler.assemble(packet_type, chunk, SnetBuffer::new, |frame| {
            assert_eq!(frame.packet_type(), packet_type);

            frames.push(frame.as_slice().to_vec())
        });

        (result, frames)
    }

    #[test]
    fn event_in_one_chunk() {
        let mut assembler = FrameAssembler::new();

        let (result, frames) = feed(&mut assembler, PacketType::Event, &[0x0e, 0x02, 0xaa, 0xbb]);

        assert_eq!(result.unwrap(), 1);
        assert_eq!(frames, vec![vec![0x0e, 0x02, 0xaa, 0xbb]]);
        assert_eq!(assembler.state(PacketType::Event), AssemblyState::Idle);
    }

    #[test]
    fn event_across_chunks() {
        let mut assembler = FrameAssembler::new();

        let (result, frames) = feed(&mut assembler, PacketType::Event, &[0x0f, 0x04, 0x00]);

        assert_eq!(result.unwrap(), 0);
        assert!(frames.is_empty());
        assert_eq!(
            assembler.state(PacketType::Event),
            AssemblyState::Assembling { received: 3, expected: 6 }
        );

        let (result, frames) = feed(&mut assembler, PacketType::Event, &[0x01, 0x02, 0x03]);

        assert_eq!(result.unwrap(), 1);
        assert_eq!(frames, vec![vec![0x0f, 0x04, 0x00, 0x01, 0x02, 0x03]]);
    }

    #[test]
    fn oversized_chunk_holds_two_frames() {
        let mut assembler = FrameAssembler::new();

        let chunk = [
            0x13, 0x01, 0x07, // first event
            0x0e, 0x03, 0x01, 0x03, 0x0c, // second event
        ];

        let (result, frames) = feed(&mut assembler, PacketType::Event, &chunk);

        assert_eq!(result.unwrap(), 2);
        assert_eq!(frames, vec![chunk[..3].to_vec(), chunk[3..].to_vec()]);
        assert_eq!(assembler.state(PacketType::Event), AssemblyState::Idle);
    }

    #[test]
    fn leftover_starts_next_frame() {
        let mut assembler = FrameAssembler::new();

        let chunk = [0x01, 0x20, 0x01, 0x00, 0xff, 0x02, 0x20, 0x02, 0x00, 0xaa];

        let (result, frames) = feed(&mut assembler, PacketType::Acl, &chunk);

        assert_eq!(result.unwrap(), 1);
        assert_eq!(frames, vec![vec![0x01, 0x20, 0x01, 0x00, 0xff]]);
        assert_eq!(
            assembler.state(PacketType::Acl),
            AssemblyState::Assembling { received: 5, expected: 6 }
        );
    }

    #[test]
    fn short_leftover_is_an_illegal_sequence() {
        let mut assembler = FrameAssembler::new();

        // The two bytes after the first frame are too short for an ACL header
        let (result, frames) = feed(&mut assembler, PacketType::Acl, &[0x01, 0x20, 0x01, 0x00, 0xff, 0x02, 0x20]);

        assert!(matches!(result, Err(Error::IllegalSequence(PacketType::Acl))));
        assert_eq!(frames, vec![vec![0x01, 0x20, 0x01, 0x00, 0xff]]);
        assert_eq!(assembler.state(PacketType::Acl), AssemblyState::Idle);
    }

    #[test]
    fn truncated_header_leaves_channel_idle() {
        let mut assembler = FrameAssembler::new();

        let (result, frames) = feed(&mut assembler, PacketType::Event, &[0x0e]);

        assert!(matches!(result, Err(Error::IllegalSequence(PacketType::Event))));
        assert!(frames.is_empty());
        assert_eq!(assembler.state(PacketType::Event), AssemblyState::Idle);

        let (result, _) = feed(&mut assembler, PacketType::Event, &[0x0e, 0x00]);

        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn acl_across_many_chunks() {
        let mut assembler = FrameAssembler::new();

        let payload: Vec<u8> = (0..300u16).map(|v| v as u8).collect();

        let mut packet = vec![0x2a, 0x00];

        packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        packet.extend_from_slice(&payload);

        let mut received = Vec::new();

        for chunk in packet.chunks(64) {
            let (result, frames) = feed(&mut assembler, PacketType::Acl, chunk);

            assert!(result.is_ok());

            received.extend(frames);
        }

        assert_eq!(received, vec![packet]);
    }

    #[test]
    fn random_chunk_boundaries() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x6832_6765);

        let packets: Vec<Vec<u8>> = (0..20)
            .map(|handle| {
                let len = rng.gen_range(0..300usize);

                let mut packet = vec![handle, 0x20];

                packet.extend_from_slice(&(len as u16).to_le_bytes());
                packet.extend((0..len).map(|_| rng.gen::<u8>()));

                packet
            })
            .collect();

        let stream = packets.concat();

        let starts: Vec<usize> = packets
            .iter()
            .scan(0, |position, packet| {
                let start = *position;
                *position += packet.len();
                Some(start)
            })
            .collect();

        let mut assembler = FrameAssembler::new();
        let mut received = Vec::new();
        let mut offset = 0;

        while offset < stream.len() {
            let mut end = core::cmp::min(stream.len(), offset + rng.gen_range(1..=128));

            // a chunk must not end within the header of a frame
            if let Some(start) = starts
                .iter()
                .find(|start| **start < end && end < **start + hci::ACL_HEADER_SIZE)
            {
                end = start + hci::ACL_HEADER_SIZE;
            }

            let (result, frames) = feed(&mut assembler, PacketType::Acl, &stream[offset..end]);

            assert!(result.is_ok(), "chunk {:?} was refused", offset..end);

            received.extend(frames);

            offset = end;
        }

        assert_eq!(received, packets);
    }

    #[test]
    fn event_buffers_come_from_recycle_list() {
        let mut assembler = FrameAssembler::new();
        let mut recycle = RecycleList::new();

        recycle.park(SnetBuffer::from_packet(&[0xEE; 16]));

        let mut posted = Vec::new();

        assembler
            .assemble(
                PacketType::Event,
                &[0x05, 0x01, 0x00],
                |size| recycle.fetch(size),
                |frame| posted.push(frame),
            )
            .unwrap();

        match posted.pop() {
            Some(Frame::Event(buffer)) => {
                assert_eq!(buffer.allocated_size(), 16);
                assert_eq!(buffer.as_slice(), &[0x05, 0x01, 0x00]);
            }
            other => panic!("unexpected frame {:?}", other),
        }

        assert!(recycle.is_empty());
    }

    #[test]
    fn reset_drops_partial_frames() {
        let mut assembler = FrameAssembler::new();

        feed(&mut assembler, PacketType::Event, &[0x0e, 0x10]).0.unwrap();
        feed(&mut assembler, PacketType::Acl, &[0x01, 0x00, 0x10, 0x00]).0.unwrap();

        assert_eq!(assembler.reset(), 2);
        assert_eq!(assembler.state(PacketType::Event), AssemblyState::Idle);
        assert_eq!(assembler.state(PacketType::Acl), AssemblyState::Idle);
    }

    #[test]
    #[should_panic]
    fn commands_are_never_assembled() {
        let mut assembler = FrameAssembler::new();

        let _ = feed(&mut assembler, PacketType::Command, &[0x03, 0x0c, 0x00]);
    }
}
