//! Attachment and sessions of devices
//!
//! A device enters the device table when the USB bus reports it was added, and stays there until
//! it is both removed from the bus and freed by its last user. In between it can be opened and
//! closed any number of times, but it can only be open once at a time.

use crate::device::{Device, DeviceFlags, UsbSetup};
use crate::hci::HciId;
use crate::usb::{self, EndpointInfo, InterfaceList, Quirks, TransferType, UsbDeviceId};
use crate::{Driver, Error, Result};
use std::sync::Arc;

/// The configuration a device is used with
const DEFAULT_CONFIGURATION: usize = 0;

impl Driver {
    /// Attach a device reported by the USB bus
    ///
    /// The device is configured and its endpoints are collected. On success the device is marked
    /// connected and returned, it is the cookie for the other calls of a device.
    ///
    /// # Error
    /// The device is not kept within the device table when any error is returned.
    /// * `TableFull` when the driver has no slot left
    /// * `NoDevice` if the device is not to be driven
    /// * `NoConfiguration` if the device has no usable configuration
    /// * `UnexpectedInterface` if the active interface is not the first interface
    /// * `MissingEndpoints` when the interrupt-in, bulk-in, or bulk-out endpoint is missing
    /// * `Usb` when the configuration of the device fails
    pub fn device_added(&self, usb: UsbDeviceId) -> Result<Arc<Device>> {
        let device = self
            .devices
            .insert_with(|slot| Device::new(usb, slot, &self.config))
            .map_err(|e| {
                log::error!("cannot attach {}: {}", usb, e);
                e
            })?;

        match self.configure(usb) {
            Ok(setup) => {
                log::info!(
                    "attached {} as {} (quirks: {:?})",
                    usb,
                    device.name(),
                    setup.quirks
                );

                device.set_setup(setup);

                device.set_connected(true);

                Ok(device)
            }
            Err(e) => {
                log::error!("cannot attach {}: {}", usb, e);

                self.devices.remove(device.slot());

                Err(e)
            }
        }
    }

    fn configure(&self, usb: UsbDeviceId) -> Result<UsbSetup> {
        let descriptor = self.bus.device_descriptor(usb).ok_or(Error::NoDevice)?;

        let quirks = usb::quirks_of(&descriptor);

        if quirks.contains(Quirks::IGNORE) {
            log::info!(
                "{:04x}:{:04x} is ignored",
                descriptor.vendor_id,
                descriptor.product_id
            );

            return Err(Error::NoDevice);
        }

        let configuration = self
            .bus
            .nth_configuration(usb, DEFAULT_CONFIGURATION)
            .ok_or(Error::NoConfiguration)?;

        let alternate = configuration
            .interfaces
            .first()
            .and_then(|interface| interface.alternates.first())
            .ok_or(Error::NoConfiguration)?;

        self.bus.set_alt_interface(usb, alternate)?;

        self.bus.set_configuration(usb, &configuration)?;

        let interface = configuration
            .interfaces
            .first()
            .and_then(InterfaceList::active)
            .ok_or(Error::NoConfiguration)?;

        if interface.interface_number != 0 {
            return Err(Error::UnexpectedInterface(interface.interface_number));
        }

        let mut interrupt_in: Option<EndpointInfo> = None;
        let mut bulk_in: Option<EndpointInfo> = None;
        let mut bulk_out: Option<EndpointInfo> = None;

        for endpoint in interface.endpoints.iter() {
            let slot = match (endpoint.descriptor.transfer_type(), endpoint.descriptor.is_in()) {
                (TransferType::Interrupt, true) => &mut interrupt_in,
                (TransferType::Bulk, true) => &mut bulk_in,
                (TransferType::Bulk, false) => &mut bulk_out,
                _ => continue,
            };

            slot.get_or_insert(*endpoint);
        }

        match (interrupt_in, bulk_in, bulk_out) {
            (Some(interrupt_in), Some(bulk_in), Some(bulk_out)) => Ok(UsbSetup {
                interrupt_in,
                bulk_in,
                bulk_out,
                request_type: quirks.request_type(),
                quirks,
            }),
            _ => Err(Error::MissingEndpoints),
        }
    }

    /// Detach a device removed from the USB bus
    ///
    /// Every queued transfer of the device is cancelled. The device stays within the device table
    /// until it is [freed](Driver::free).
    pub fn device_removed(&self, device: &Arc<Device>) {
        if !device.test_and_clear(DeviceFlags::RUNNING) {
            log::error!("{} was not running when it was removed", device.name());
        }

        self.cancel_transfers(device);

        device.set_connected(false);

        log::info!("{} removed", device.name());
    }

    fn cancel_transfers(&self, device: &Device) {
        let Some(setup) = device.setup() else { return };

        for endpoint in [setup.interrupt_in, setup.bulk_in, setup.bulk_out] {
            if let Err(e) = self.bus.cancel_queued_transfers(endpoint.pipe) {
                log::warn!("{}: cannot cancel transfers of {:?}: {}", device.name(), endpoint.pipe, e);
            }
        }
    }

    /// Cancel the receive transfers of a device
    pub(crate) fn cancel_rx_transfers(&self, device: &Device) {
        let Some(setup) = device.setup() else { return };

        for endpoint in [setup.interrupt_in, setup.bulk_in] {
            if let Err(e) = self.bus.cancel_queued_transfers(endpoint.pipe) {
                log::warn!("{}: cannot cancel transfers of {:?}: {}", device.name(), endpoint.pipe, e);
            }
        }
    }

    /// Open the device published as `name`
    ///
    /// # Error
    /// * `NotFound` if no device is published as `name`
    /// * `NoDevice` if the device was removed from the USB bus
    /// * `AlreadyRunning` if the device is already open
    pub fn open(&self, name: &str) -> Result<Arc<Device>> {
        let device = self
            .devices
            .find(|device| device.name() == name)
            .ok_or(Error::NotFound)?;

        if !device.is_connected() {
            return Err(Error::NoDevice);
        }

        self.start(&device)?;

        Ok(device)
    }

    fn start(&self, device: &Device) -> Result<()> {
        let _guard = device.lock.lock();

        if device.test_and_set(DeviceFlags::RUNNING) {
            return Err(Error::AlreadyRunning);
        }

        device.release_buffers();

        let hci_id = match &self.stack {
            Some(stack) => match stack.register(device.name()) {
                Ok(hci_id) => hci_id,
                Err(e) => {
                    device.test_and_clear(DeviceFlags::RUNNING);

                    return Err(e);
                }
            },
            None => {
                log::warn!("no HCI stack bound, {} uses its slot as HCI id", device.name());

                HciId(device.slot().index() as u32)
            }
        };

        device.set_hci_id(Some(hci_id));

        device.opened();

        log::info!("{} opened as {}", device.name(), hci_id);

        Ok(())
    }

    /// Close a device
    ///
    /// Queued transfers are cancelled and every buffer held by the device is freed.
    pub fn close(&self, device: &Arc<Device>) {
        let _guard = device.lock.lock();

        if device.is_connected() {
            self.cancel_transfers(device);
        }

        device.release_buffers();

        if let Some(hci_id) = device.hci_id() {
            if let Some(stack) = &self.stack {
                stack.unregister(hci_id);
            }
        }

        device.set_hci_id(None);

        if !device.test_and_clear(DeviceFlags::RUNNING) {
            log::error!("{} was not running when it was closed", device.name());
        }

        device.closed();

        log::info!("{} closed", device.name());
    }

    /// Free a device
    ///
    /// The device is only removed from the device table once it is no longer connected. The
    /// return is true if the device was removed.
    pub fn free(&self, device: &Arc<Device>) -> bool {
        if device.is_connected() {
            log::debug!("{} is still connected and is not freed", device.name());

            return false;
        }

        self.devices.remove(device.slot()).is_some()
    }
}
