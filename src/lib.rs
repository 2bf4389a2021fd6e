//! A generic USB transport driver for Bluetooth controllers
//!
//! Bluetooth controllers attached by USB all use the same transport. Commands are sent with control
//! requests, events are read from an interrupt endpoint, and ACL data travels through a pair of
//! bulk endpoints. This crate drives that transport between a USB bus manager, abstracted by
//! [`UsbBus`](usb::UsbBus), and an upper HCI stack, abstracted by [`HciStack`](upper::HciStack).
//!
//! A [`Driver`] keeps the table of attached devices. Transfers received from a device are
//! reassembled into complete HCI packets and given to the upper stack (or, for events, to an
//! [`EventPort`](upper::EventPort) when no stack is bound). Packets sent by the upper stack are
//! queued per device and submitted to the USB bus by the device's transmit scheduler.
//!
//! ```
//! # use std::sync::Arc;
//! # use bo_tie_hci_usb::usb::*;
//! # use bo_tie_hci_usb::transactions::Transfer;
//! # struct NoBus;
//! # impl UsbBus for NoBus {
//! #     fn nth_configuration(&self, _: UsbDeviceId, _: usize) -> Option<ConfigurationInfo> { None }
//! #     fn set_alt_interface(&self, _: UsbDeviceId, _: &InterfaceInfo) -> Result<(), UsbError> { Ok(()) }
//! #     fn set_configuration(&self, _: UsbDeviceId, _: &ConfigurationInfo) -> Result<(), UsbError> { Ok(()) }
//! #     fn device_descriptor(&self, _: UsbDeviceId) -> Option<DeviceDescriptor> { None }
//! #     fn register_driver(&self, _: &str, _: &[SupportDescriptor]) -> Result<(), UsbError> { Ok(()) }
//! #     fn install_notify(&self, _: &str) -> Result<(), UsbError> { Ok(()) }
//! #     fn uninstall_notify(&self, _: &str) {}
//! #     fn queue_interrupt(&self, _: PipeHandle, t: Transfer) -> Result<(), Rejected> {
//! #         Err(Rejected::new(UsbError::NoDevice, t))
//! #     }
//! #     fn queue_bulk(&self, _: PipeHandle, t: Transfer) -> Result<(), Rejected> {
//! #         Err(Rejected::new(UsbError::NoDevice, t))
//! #     }
//! #     fn queue_request(&self, _: UsbDeviceId, _: ControlRequest, t: Transfer) -> Result<(), Rejected> {
//! #         Err(Rejected::new(UsbError::NoDevice, t))
//! #     }
//! #     fn cancel_queued_transfers(&self, _: PipeHandle) -> Result<(), UsbError> { Ok(()) }
//! # }
//! use bo_tie_hci_usb::{config::DriverConfig, upper::ChannelStack, Driver};
//!
//! let (stack, _receiver) = ChannelStack::new();
//!
//! let driver = Driver::new(Arc::new(NoBus), Some(Arc::new(stack)), None, DriverConfig::default());
//!
//! driver.init_driver().unwrap();
//!
//! assert!(driver.publish_devices().is_empty());
//! ```

pub mod assembler;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod hci;
pub mod hooks;
mod lifecycle;
pub mod scheduler;
pub mod stats;
pub mod table;
pub mod transactions;
pub mod upper;
pub mod usb;

pub use error::{Error, Result};

use config::DriverConfig;
use device::Device;
use std::sync::Arc;
use table::DeviceTable;
use upper::{EventPort, HciStack};
use usb::UsbBus;

/// The driver
///
/// There is one driver for all devices attached to a USB bus.
pub struct Driver {
    bus: Arc<dyn UsbBus>,
    stack: Option<Arc<dyn HciStack>>,
    port: Option<Arc<dyn EventPort>>,
    config: DriverConfig,
    devices: DeviceTable<Device>,
}

impl Driver {
    /// Create a new driver
    ///
    /// Received packets are given to `stack`. When there is no `stack` events are written to
    /// `port` instead and ACL data is dropped.
    pub fn new(
        bus: Arc<dyn UsbBus>,
        stack: Option<Arc<dyn HciStack>>,
        port: Option<Arc<dyn EventPort>>,
        config: DriverConfig,
    ) -> Arc<Self> {
        Arc::new(Driver {
            bus,
            stack,
            port,
            config,
            devices: DeviceTable::new(),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Get the table of attached devices
    pub fn devices(&self) -> &DeviceTable<Device> {
        &self.devices
    }
}
