//! The driver hooks
//!
//! These are the entry points the host's device file system uses. Data does not flow through
//! [`read`](Driver::read) or [`write`](Driver::write), packets only travel by the USB transfers and
//! the upper HCI layer.

use crate::buffer::SnetBuffer;
use crate::device::{Device, DeviceFlags};
use crate::hci::{HciId, MAX_COMMAND_SIZE, RESET_COMMAND};
use crate::scheduler::TxEntry;
use crate::stats::HciStatistics;
use crate::usb::{Quirks, SUPPORTED_DEVICES};
use crate::{Driver, Error, Result};
use std::sync::Arc;

/// The name the driver registers with the USB bus
pub const DRIVER_NAME: &str = "h2generic";

const DEVICE_OP_CODES_END: u32 = 9999;

/// A control request to a device
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    /// Send a raw HCI command directly to the controller
    IssueCommand(Vec<u8>),
    /// Start receiving events and ACL data
    Up,
    GetStats,
    GetHciId,
}

impl Control {
    pub const ISSUE_COMMAND: u32 = DEVICE_OP_CODES_END + 1;
    pub const GET_STATS: u32 = DEVICE_OP_CODES_END + 2;
    pub const GET_NOTIFICATION_PORT: u32 = DEVICE_OP_CODES_END + 3;
    pub const GET_HCI_ID: u32 = DEVICE_OP_CODES_END + 4;
    pub const UP: u32 = DEVICE_OP_CODES_END + 5;

    /// Decode a raw control request
    ///
    /// # Error
    /// `BadValue` is returned for an unknown opcode, or for a command that is empty or larger than an
    /// HCI command can be.
    /// `NotSupported` is returned for requests the driver knows but does not implement.
    pub fn from_raw(opcode: u32, params: &[u8]) -> Result<Self> {
        match opcode {
            Self::ISSUE_COMMAND if params.is_empty() || params.len() > MAX_COMMAND_SIZE => Err(Error::BadValue),
            Self::ISSUE_COMMAND => Ok(Control::IssueCommand(params.to_vec())),
            Self::GET_STATS => Ok(Control::GetStats),
            Self::GET_HCI_ID => Ok(Control::GetHciId),
            Self::UP => Ok(Control::Up),
            Self::GET_NOTIFICATION_PORT => Err(Error::NotSupported),
            _ => Err(Error::BadValue),
        }
    }
}

/// The reply to a [`Control`] request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Stats(HciStatistics),
    HciId(HciId),
}

impl Driver {
    /// Register the driver with the USB bus
    pub fn init_driver(&self) -> Result<()> {
        self.bus.register_driver(DRIVER_NAME, SUPPORTED_DEVICES)?;

        self.bus.install_notify(DRIVER_NAME)?;

        log::info!("{} registered for {} device kinds", DRIVER_NAME, SUPPORTED_DEVICES.len());

        Ok(())
    }

    /// Unregister the driver from the USB bus
    ///
    /// Every device still within the device table is dropped.
    pub fn uninit_driver(&self) {
        self.bus.uninstall_notify(DRIVER_NAME);

        for device in self.devices.entries() {
            device.release_buffers();

            self.devices.remove(device.slot());
        }
    }

    /// Get the names of the devices to publish
    pub fn publish_devices(&self) -> Vec<String> {
        self.devices
            .entries()
            .iter()
            .map(|device| device.name().to_string())
            .collect()
    }

    /// Handle a control request to a device
    pub fn control(self: &Arc<Self>, device: &Arc<Device>, request: Control) -> Result<ControlReply> {
        let _guard = device.lock.lock();

        match request {
            Control::IssueCommand(command) => {
                let mut buffer = device.recycle.lock().fetch(command.len());

                buffer.put(&command);

                match self.submit_tx(device, TxEntry::Command(buffer)) {
                    Ok(()) => Ok(ControlReply::Done),
                    Err((error, entry)) => {
                        if let TxEntry::Command(buffer) = entry {
                            device.recycle.lock().park(buffer);
                        }

                        Err(error)
                    }
                }
            }
            Control::Up => self.up(device).map(|_| ControlReply::Done),
            Control::GetStats => Ok(ControlReply::Stats(device.stats.snapshot())),
            Control::GetHciId => device.hci_id().map(ControlReply::HciId).ok_or(Error::NotReady),
        }
    }

    /// Arm the receive transfers and mark the device running
    fn up(self: &Arc<Self>, device: &Arc<Device>) -> Result<()> {
        let armed = self.submit_rx_event(device).and_then(|_| {
            for i in 0..self.config.acl_rx_window {
                match self.submit_rx_acl(device) {
                    // The window only needs its first transfer
                    Err(e) if i == 0 => return Err(e),
                    Err(e) => log::debug!("{}: ACL window limited to {}: {}", device.name(), i, e),
                    Ok(()) => continue,
                }

                break;
            }

            Ok(())
        });

        if let Err(e) = armed {
            // The session stays open so that `Up` can be retried or the device closed
            self.cancel_rx_transfers(device);

            return Err(e);
        }

        device.test_and_set(DeviceFlags::RUNNING);

        if device.quirks().contains(Quirks::NEEDS_RESET) {
            log::debug!("{}: resetting controller", device.name());

            let command = SnetBuffer::from_packet(&RESET_COMMAND);

            device.tx.enqueue(TxEntry::Command(command));

            self.sched_tx_processing(device);
        }

        log::info!("{} is up", device.name());

        Ok(())
    }

    pub fn read(&self, _device: &Arc<Device>, _buffer: &mut [u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }

    pub fn write(&self, _device: &Arc<Device>, _buffer: &[u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }
}
