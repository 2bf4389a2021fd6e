//! The boundary between the driver and the upper HCI layer
//!
//! Received frames are given to the [`HciStack`] bound to the driver. A driver without a bound stack
//! still delivers events, it writes them to the [`EventPort`] a userland Bluetooth stack reads
//! from. ACL data has no such fallback.
//!
//! Packets sent by the upper layer are queued on the device and submitted to the USB bus by the
//! transmit scheduler.

use crate::assembler::Frame;
use crate::buffer::{NetBuffer, SnetBuffer};
use crate::device::Device;
use crate::hci::{pack_port_code, HciId, HciPacket, PacketType, MAX_COMMAND_SIZE};
use crate::scheduler::TxEntry;
use crate::stats::Statistics;
use crate::usb::Quirks;
use crate::{Driver, Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// The upper HCI stack
pub trait HciStack: Send + Sync {
    /// Register a device with the stack
    ///
    /// The returned identifier is what the stack uses to address the device.
    fn register(&self, name: &str) -> Result<HciId>;

    fn unregister(&self, id: HciId);

    /// Deliver an event received from a controller
    fn post_event(&self, id: HciId, event: &[u8]);

    /// Deliver ACL data received from a controller
    fn receive_data(&self, id: HciId, data: NetBuffer);
}

/// Error of writing to an [`EventPort`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("timed out")]
    Timeout,
    #[error("port closed")]
    Closed,
}

/// A message port to a userland Bluetooth stack
pub trait EventPort: Send + Sync {
    /// Write a message to the port
    ///
    /// The write blocks no longer than `timeout` when the port is full.
    fn write(&self, code: i32, data: &[u8], timeout: Duration) -> core::result::Result<(), PortError>;
}

struct PortState {
    messages: VecDeque<(i32, Vec<u8>)>,
    closed: bool,
}

/// A bounded in-memory message port
pub struct PortQueue {
    capacity: usize,
    state: Mutex<PortState>,
    readable: Condvar,
    writable: Condvar,
}

impl PortQueue {
    /// Create a port holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        PortQueue {
            capacity,
            state: Mutex::new(PortState {
                messages: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Read the next message
    ///
    /// `None` is returned when no message arrives within `timeout` or the port is closed and
    /// empty.
    pub fn read(&self, timeout: Duration) -> Option<(i32, Vec<u8>)> {
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();

        loop {
            if let Some(message) = state.messages.pop_front() {
                self.writable.notify_one();

                break Some(message);
            }

            if state.closed || self.readable.wait_until(&mut state, deadline).timed_out() {
                break state.messages.pop_front();
            }
        }
    }

    /// Close the port
    ///
    /// Further writes fail, but messages already within the port can still be read.
    pub fn close(&self) {
        self.state.lock().closed = true;

        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventPort for PortQueue {
    fn write(&self, code: i32, data: &[u8], timeout: Duration) -> core::result::Result<(), PortError> {
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();

        while state.messages.len() >= self.capacity {
            if state.closed {
                return Err(PortError::Closed);
            }

            if self.writable.wait_until(&mut state, deadline).timed_out() && state.messages.len() >= self.capacity {
                return Err(PortError::Timeout);
            }
        }

        if state.closed {
            return Err(PortError::Closed);
        }

        state.messages.push_back((code, data.to_vec()));

        self.readable.notify_one();

        Ok(())
    }
}

/// An [`HciStack`] forwarding received packets to a channel
///
/// Identifiers are handed out in the order devices register, starting at zero.
pub struct ChannelStack {
    sender: UnboundedSender<(HciId, HciPacket<Vec<u8>>)>,
    next_id: AtomicU32,
    registered: Mutex<Vec<(HciId, String)>>,
}

impl ChannelStack {
    pub fn new() -> (Self, UnboundedReceiver<(HciId, HciPacket<Vec<u8>>)>) {
        let (sender, receiver) = unbounded_channel();

        let stack = ChannelStack {
            sender,
            next_id: AtomicU32::new(0),
            registered: Mutex::new(Vec::new()),
        };

        (stack, receiver)
    }

    /// Get the devices registered with this stack
    pub fn registered(&self) -> Vec<(HciId, String)> {
        self.registered.lock().clone()
    }

    fn forward(&self, id: HciId, packet: HciPacket<Vec<u8>>) {
        if self.sender.send((id, packet)).is_err() {
            log::warn!("receiver of {} dropped, packet discarded", id);
        }
    }
}

impl HciStack for ChannelStack {
    fn register(&self, name: &str) -> Result<HciId> {
        let id = HciId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.registered.lock().push((id, name.to_string()));

        Ok(id)
    }

    fn unregister(&self, id: HciId) {
        self.registered.lock().retain(|(registered, _)| *registered != id)
    }

    fn post_event(&self, id: HciId, event: &[u8]) {
        self.forward(id, HciPacket::Event(event.to_vec()))
    }

    fn receive_data(&self, id: HciId, data: NetBuffer) {
        self.forward(id, HciPacket::Acl(data.into_vec()))
    }
}

impl Driver {
    /// Find a device
    ///
    /// With `device` this checks that the device is still within the device table, otherwise this
    /// looks up the device assigned `hci_id`.
    pub fn fetch_device(&self, device: Option<&Arc<Device>>, hci_id: HciId) -> Option<Arc<Device>> {
        match device {
            Some(device) => self.devices.contains(device).then(|| device.clone()),
            None => self.devices.find(|device| device.hci_id() == Some(hci_id)),
        }
    }

    /// Give a complete frame to the upper layer
    pub(crate) fn post_packet_up(&self, device: &Arc<Device>, frame: Frame) {
        let hci_id = device.hci_id();

        let stack = self.stack.as_ref().zip(hci_id);

        match frame {
            Frame::Event(buffer) => {
                Statistics::inc(&device.stats.event_rx);

                if let Some((stack, id)) = stack {
                    stack.post_event(id, buffer.filled());
                } else if let Some(port) = &self.port {
                    let id = hci_id.unwrap_or(HciId(device.slot().index() as u32));

                    let code = pack_port_code(PacketType::Event, id, -1);

                    if let Err(e) = port.write(code, buffer.filled(), self.config.event_port_timeout) {
                        log::error!("{}: event not written to port: {}", device.name(), e);
                    }
                } else {
                    log::warn!("{}: no HCI stack or event port, event dropped", device.name());
                }

                device.recycle.lock().park(buffer);
            }
            Frame::Acl(buffer) => {
                Statistics::inc(&device.stats.acl_rx);

                if let Some((stack, id)) = stack {
                    stack.receive_data(id, buffer);
                } else {
                    log::error!(
                        "{}: no HCI stack bound, ACL frame of {} bytes dropped",
                        device.name(),
                        buffer.len()
                    );
                }
            }
        }
    }

    /// Send a packet to the controller of `hci_id`
    ///
    /// The packet is queued and the transmit scheduler is run. A `None` packet only runs the
    /// scheduler. Commands are copied into a buffer of the device's recycle list.
    ///
    /// # Error
    /// * `NotFound` if no device is assigned `hci_id`
    /// * `BadValue` if `packet_type` is not sent to a controller, or the packet is a command larger
    ///   than an HCI command can be
    /// * `NotSupported` if the packet is SCO data and the device cannot send SCO data
    ///
    /// # Panic
    /// The protocol of `buffer` must be `packet_type`.
    pub fn send_packet(
        self: &Arc<Self>,
        hci_id: HciId,
        packet_type: PacketType,
        buffer: Option<NetBuffer>,
    ) -> Result<()> {
        let device = self.fetch_device(None, hci_id).ok_or(Error::NotFound)?;

        if !packet_type.is_outgoing() {
            return Err(Error::BadValue);
        }

        if let Some(buffer) = buffer {
            assert_eq!(
                buffer.protocol(),
                packet_type,
                "buffer tagged as {} sent as {}",
                buffer.protocol(),
                packet_type
            );

            let entry = match packet_type {
                PacketType::Command if buffer.len() > MAX_COMMAND_SIZE => return Err(Error::BadValue),
                PacketType::Command => {
                    let mut command = device.recycle.lock().fetch(buffer.len());

                    command.put(buffer.as_slice());

                    TxEntry::Command(command)
                }
                PacketType::Acl => TxEntry::Acl(buffer),
                PacketType::Sco if device.quirks().contains(Quirks::SCO_NOT_WORKING) => {
                    return Err(Error::NotSupported)
                }
                PacketType::Sco => {
                    Statistics::inc(&device.stats.sco_tx);

                    TxEntry::Sco(buffer)
                }
                PacketType::Event => unreachable!(),
            };

            device.tx.enqueue(entry);
        }

        self.sched_tx_processing(&device);

        Ok(())
    }

    /// Send a command to the controller of `hci_id`
    ///
    /// A `None` command only runs the transmit scheduler.
    ///
    /// # Error
    /// * `NotFound` if no device is assigned `hci_id`
    /// * `BadValue` if the command is larger than an HCI command can be
    pub fn send_command(self: &Arc<Self>, hci_id: HciId, command: Option<SnetBuffer>) -> Result<()> {
        let device = self.fetch_device(None, hci_id).ok_or(Error::NotFound)?;

        if let Some(command) = command {
            if command.size() > MAX_COMMAND_SIZE {
                return Err(Error::BadValue);
            }

            device.tx.enqueue(TxEntry::Command(command));
        }

        self.sched_tx_processing(&device);

        Ok(())
    }

    /// Run the transmit scheduler of a device
    ///
    /// Returns false if another context is already draining the queues of the device. That context
    /// makes another pass over the queues before it finishes.
    pub fn sched_tx_processing(self: &Arc<Self>, device: &Arc<Device>) -> bool {
        device.tx.schedule(|entry| {
            self.submit_tx(device, entry).map_err(|(error, entry)| {
                log::debug!("{}: {} not submitted: {}", device.name(), entry.packet_type(), error);

                entry
            })
        })
    }
}
