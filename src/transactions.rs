//! USB transfers of the driver
//!
//! Every buffer handed to the USB bus is owned by a [`Transfer`]. The bus gives the transfer back
//! either when it refuses to queue it (within a [`Rejected`]) or by calling
//! [`complete`](Transfer::complete) once the transfer is done. Completion dispatches to the handler
//! of the transfer's kind.
//!
//! Receive transfers keep the endpoints polled. Once a receive transfer completes its data is fed
//! to the frame assembler and the same buffer is queued again, unless the transfer was cancelled or
//! the device is gone.

use crate::buffer::{NetBuffer, SnetBuffer};
use crate::device::Device;
use crate::hci::{PacketType, MAX_COMMAND_SIZE, MAX_EVENT_SIZE, MAX_FRAME_SIZE};
use crate::scheduler::TxEntry;
use crate::stats::Statistics;
use crate::usb::{ControlRequest, Rejected, UsbStatus, BLUETOOTH_CTRL_REQUEST};
use crate::{Driver, Error, Result};
use core::fmt;
use std::sync::Arc;

/// The kind of a transfer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TransferKind {
    /// Events read from the interrupt-in endpoint
    EventRx,
    /// ACL data read from the bulk-in endpoint
    AclRx,
    /// A command sent through the control endpoint
    CommandTx,
    /// ACL data written to the bulk-out endpoint
    AclTx,
}

enum Payload {
    EventRx { buffer: Vec<u8>, size: usize },
    AclRx { buffer: Vec<u8>, size: usize },
    Command(SnetBuffer),
    AclTx(NetBuffer),
}

/// A transfer queued on the USB bus
pub struct Transfer {
    driver: Arc<Driver>,
    device: Arc<Device>,
    payload: Payload,
}

impl Transfer {
    pub fn kind(&self) -> TransferKind {
        match self.payload {
            Payload::EventRx { .. } => TransferKind::EventRx,
            Payload::AclRx { .. } => TransferKind::AclRx,
            Payload::Command(_) => TransferKind::CommandTx,
            Payload::AclTx(_) => TransferKind::AclTx,
        }
    }

    /// The device the transfer belongs to
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Get the data of the transfer
    ///
    /// For a receive transfer these are the bytes the bus is to fill.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::EventRx { buffer, size } | Payload::AclRx { buffer, size } => &buffer[..*size],
            Payload::Command(buffer) => buffer.as_slice(),
            Payload::AclTx(buffer) => buffer.as_slice(),
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.payload {
            Payload::EventRx { buffer, size } | Payload::AclRx { buffer, size } => &mut buffer[..*size],
            Payload::Command(buffer) => buffer.as_mut_slice(),
            Payload::AclTx(buffer) => buffer.as_mut_slice(),
        }
    }

    /// The length of the transfer
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Complete the transfer
    ///
    /// This is called by the USB bus once the transfer is done. Input `actual_len` is the number of
    /// bytes that were transferred.
    pub fn complete(self, status: UsbStatus, actual_len: usize) {
        let Transfer { driver, device, payload } = self;

        match payload {
            Payload::EventRx { buffer, size } => {
                driver.on_rx_complete(device, PacketType::Event, buffer, size, status, actual_len)
            }
            Payload::AclRx { buffer, size } => {
                driver.on_rx_complete(device, PacketType::Acl, buffer, size, status, actual_len)
            }
            Payload::Command(buffer) => driver.on_command_tx_complete(device, buffer, status, actual_len),
            Payload::AclTx(buffer) => driver.on_acl_tx_complete(device, buffer, status, actual_len),
        }
    }

    /// Take back the buffer of a receive transfer that could not be queued
    fn reclaim_rx(self) {
        match self.payload {
            Payload::EventRx { buffer, .. } => self.device.event_room.reuse(buffer),
            Payload::AclRx { buffer, .. } => self.device.acl_room.reuse(buffer),
            Payload::Command(_) | Payload::AclTx(_) => unreachable!("not a receive transfer"),
        }
    }

    /// Turn a transmit transfer that could not be queued back into a queue entry
    fn into_entry(self) -> TxEntry {
        match self.payload {
            Payload::Command(buffer) => TxEntry::Command(buffer),
            Payload::AclTx(buffer) => TxEntry::Acl(buffer),
            Payload::EventRx { .. } | Payload::AclRx { .. } => unreachable!("not a transmit transfer"),
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("device", &self.device.name())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

impl Driver {
    /// Queue an interrupt transfer to receive events
    pub(crate) fn submit_rx_event(self: &Arc<Self>, device: &Arc<Device>) -> Result<()> {
        let setup = device.setup().ok_or(Error::NotReady)?;

        let size = core::cmp::max(MAX_EVENT_SIZE, setup.interrupt_in.max_packet_size());

        let buffer = device.event_room.alloc(size);

        self.queue_rx(device, Payload::EventRx { buffer, size })
    }

    /// Queue a bulk transfer to receive ACL data
    pub(crate) fn submit_rx_acl(self: &Arc<Self>, device: &Arc<Device>) -> Result<()> {
        let setup = device.setup().ok_or(Error::NotReady)?;

        let size = core::cmp::max(MAX_FRAME_SIZE, setup.bulk_in.max_packet_size());

        let buffer = device.acl_room.alloc(size);

        self.queue_rx(device, Payload::AclRx { buffer, size })
    }

    fn queue_rx(self: &Arc<Self>, device: &Arc<Device>, payload: Payload) -> Result<()> {
        let setup = device.setup().ok_or(Error::NotReady)?;

        let transfer = Transfer {
            driver: self.clone(),
            device: device.clone(),
            payload,
        };

        let queued = match transfer.kind() {
            TransferKind::EventRx => self.bus.queue_interrupt(setup.interrupt_in.pipe, transfer),
            _ => self.bus.queue_bulk(setup.bulk_in.pipe, transfer),
        };

        match queued {
            Ok(()) => {
                Statistics::inc(&device.stats.accepted_rx);

                Ok(())
            }
            Err(Rejected { error, transfer }) => {
                log::debug!("{}: {:?} transfer rejected: {}", device.name(), transfer.kind(), error);

                transfer.reclaim_rx();

                Statistics::inc(&device.stats.rejected_rx);

                Err(error.into())
            }
        }
    }

    /// Submit an entry of a transmit queue to the USB bus
    ///
    /// On failure the entry is returned with the reason.
    pub(crate) fn submit_tx(
        self: &Arc<Self>,
        device: &Arc<Device>,
        entry: TxEntry,
    ) -> core::result::Result<(), (Error, TxEntry)> {
        if !device.is_running() {
            return Err((Error::NotReady, entry));
        }

        let Some(setup) = device.setup() else {
            return Err((Error::NotReady, entry));
        };

        let (packet_type, queued) = match entry {
            TxEntry::Command(buffer) => {
                let length = match u16::try_from(buffer.size()) {
                    Ok(length) if usize::from(length) <= MAX_COMMAND_SIZE => length,
                    _ => return Err((Error::BadValue, TxEntry::Command(buffer))),
                };

                let request = ControlRequest {
                    request_type: setup.request_type,
                    request: BLUETOOTH_CTRL_REQUEST,
                    value: 0,
                    index: 0,
                    length,
                };

                let transfer = self.tx_transfer(device, Payload::Command(buffer));

                (PacketType::Command, self.bus.queue_request(device.usb_id(), request, transfer))
            }
            TxEntry::Acl(buffer) => {
                let transfer = self.tx_transfer(device, Payload::AclTx(buffer));

                (PacketType::Acl, self.bus.queue_bulk(setup.bulk_out.pipe, transfer))
            }
            sco @ TxEntry::Sco(_) => return Err((Error::NotSupported, sco)),
        };

        match queued {
            Ok(()) => {
                log::trace!("{}: queued {} transfer", device.name(), packet_type);

                Statistics::inc(&device.stats.accepted_tx);

                Ok(())
            }
            Err(Rejected { error, transfer }) => {
                Statistics::inc(&device.stats.rejected_tx);

                Err((error.into(), transfer.into_entry()))
            }
        }
    }

    fn tx_transfer(self: &Arc<Self>, device: &Arc<Device>, payload: Payload) -> Transfer {
        Transfer {
            driver: self.clone(),
            device: device.clone(),
            payload,
        }
    }

    fn on_rx_complete(
        self: Arc<Self>,
        device: Arc<Device>,
        packet_type: PacketType,
        buffer: Vec<u8>,
        size: usize,
        status: UsbStatus,
        actual_len: usize,
    ) {
        if status.ends_polling() {
            log::debug!("{}: {} endpoint no longer polled ({:?})", device.name(), packet_type, status);

            return;
        }

        if !status.is_ok() {
            log::debug!("{}: {} transfer failed with {:?}", device.name(), packet_type, status);
        } else if actual_len != 0 {
            let received = &buffer[..core::cmp::min(actual_len, size)];

            self.assemble(&device, packet_type, received);
        }

        let payload = match packet_type {
            PacketType::Event => Payload::EventRx { buffer, size },
            _ => Payload::AclRx { buffer, size },
        };

        // The rejection is already counted and the buffer put back into its room
        let _ = self.queue_rx(&device, payload);
    }

    fn assemble(self: &Arc<Self>, device: &Arc<Device>, packet_type: PacketType, received: &[u8]) {
        Statistics::add(&device.stats.bytes_rx, received.len());

        let mut frames = Vec::new();

        let assembled = device.rx.lock().assemble(
            packet_type,
            received,
            |size| device.recycle.lock().fetch(size),
            |frame| frames.push(frame),
        );

        for frame in frames {
            self.post_packet_up(device, frame);
        }

        match assembled {
            Ok(_) => Statistics::inc(&device.stats.successful_rx),
            Err(e) => {
                log::error!("{}: {}", device.name(), e);

                Statistics::inc(&device.stats.error_rx);
            }
        }
    }

    fn tx_completed(&self, device: &Device, status: UsbStatus, actual_len: usize) {
        if status.is_ok() {
            Statistics::inc(&device.stats.successful_tx);
            Statistics::add(&device.stats.bytes_tx, actual_len);
        } else {
            log::debug!("{}: transmit transfer failed with {:?}", device.name(), status);

            Statistics::inc(&device.stats.error_tx);
        }
    }

    fn on_command_tx_complete(
        self: Arc<Self>,
        device: Arc<Device>,
        buffer: SnetBuffer,
        status: UsbStatus,
        actual_len: usize,
    ) {
        self.tx_completed(&device, status, actual_len);

        if status.is_ok() {
            Statistics::inc(&device.stats.command_tx);
        }

        device.recycle.lock().park(buffer);

        if self.config.reschedule_after_completion && !status.ends_polling() {
            self.sched_tx_processing(&device);
        }
    }

    fn on_acl_tx_complete(
        self: Arc<Self>,
        device: Arc<Device>,
        buffer: NetBuffer,
        status: UsbStatus,
        actual_len: usize,
    ) {
        self.tx_completed(&device, status, actual_len);

        if status.is_ok() {
            Statistics::inc(&device.stats.acl_tx);
        }

        drop(buffer);

        if self.config.reschedule_after_completion && !status.ends_polling() {
            self.sched_tx_processing(&device);
        }
    }
}
