//! A spoof of the USB bus
//!
//! `UsbSpoof` keeps every transfer queued by the driver until a test completes it, so a test
//! decides what is received and when a transmission finishes.

#![allow(dead_code)]

use bo_tie_hci_usb::config::DriverConfig;
use bo_tie_hci_usb::device::Device;
use bo_tie_hci_usb::transactions::{Transfer, TransferKind};
use bo_tie_hci_usb::upper::{ChannelStack, EventPort, HciStack};
use bo_tie_hci_usb::usb::*;
use bo_tie_hci_usb::Driver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

pub const INTERRUPT_IN: PipeHandle = PipeHandle(1);
pub const BULK_IN: PipeHandle = PipeHandle(2);
pub const BULK_OUT: PipeHandle = PipeHandle(3);

/// Where a transfer was queued
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Target {
    Pipe(PipeHandle),
    Control(UsbDeviceId, ControlRequest),
}

impl Target {
    fn is_pipe(&self, pipe: PipeHandle) -> bool {
        matches!(self, Target::Pipe(p) if *p == pipe)
    }
}

#[derive(Default)]
pub struct UsbSpoof {
    devices: Mutex<HashMap<UsbDeviceId, (DeviceDescriptor, ConfigurationInfo)>>,
    queued: Mutex<Vec<(Target, Transfer)>>,
    /// The data of every accepted transmit transfer, in the order they were queued
    sent: Mutex<Vec<(Target, Vec<u8>)>>,
    cancelled: Mutex<Vec<PipeHandle>>,
    notified: Mutex<Vec<String>>,
    reject_count: AtomicUsize,
}

impl UsbSpoof {
    pub fn new() -> Arc<Self> {
        Arc::new(UsbSpoof::default())
    }

    /// Add a device to the bus
    pub fn plug(&self, id: UsbDeviceId, descriptor: DeviceDescriptor, configuration: ConfigurationInfo) {
        self.devices.lock().insert(id, (descriptor, configuration));
    }

    /// Reject the next `count` transfers
    pub fn reject_next(&self, count: usize) {
        self.reject_count.store(count, Ordering::SeqCst);
    }

    pub fn queued(&self, kind: TransferKind) -> usize {
        self.queued.lock().iter().filter(|(_, t)| t.kind() == kind).count()
    }

    pub fn queued_on(&self, pipe: PipeHandle) -> usize {
        self.queued.lock().iter().filter(|(target, _)| target.is_pipe(pipe)).count()
    }

    pub fn sent(&self) -> Vec<(Target, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<PipeHandle> {
        self.cancelled.lock().clone()
    }

    pub fn notified(&self) -> Vec<String> {
        self.notified.lock().clone()
    }

    fn take(&self, kind: TransferKind) -> Option<Transfer> {
        let mut queued = self.queued.lock();

        let index = queued.iter().position(|(_, t)| t.kind() == kind)?;

        Some(queued.remove(index).1)
    }

    /// Complete the oldest receive transfer of `kind` with `data`
    ///
    /// Returns false if no such transfer is queued.
    pub fn receive(&self, kind: TransferKind, data: &[u8]) -> bool {
        match self.take(kind) {
            Some(mut transfer) => {
                transfer.data_mut()[..data.len()].copy_from_slice(data);

                transfer.complete(UsbStatus::Ok, data.len());

                true
            }
            None => false,
        }
    }

    /// Complete the oldest transfer of `kind` with `status`
    pub fn finish(&self, kind: TransferKind, status: UsbStatus) -> bool {
        match self.take(kind) {
            Some(transfer) => {
                let len = if status.is_ok() { transfer.len() } else { 0 };

                transfer.complete(status, len);

                true
            }
            None => false,
        }
    }

    fn queue(&self, target: Target, transfer: Transfer) -> Result<(), Rejected> {
        let rejected = self
            .reject_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok();

        if rejected {
            return Err(Rejected::new(UsbError::Stalled, transfer));
        }

        if matches!(transfer.kind(), TransferKind::CommandTx | TransferKind::AclTx) {
            self.sent.lock().push((target, transfer.data().to_vec()));
        }

        self.queued.lock().push((target, transfer));

        Ok(())
    }
}

impl UsbBus for UsbSpoof {
    fn nth_configuration(&self, device: UsbDeviceId, index: usize) -> Option<ConfigurationInfo> {
        match index {
            0 => self.devices.lock().get(&device).map(|(_, c)| c.clone()),
            _ => None,
        }
    }

    fn set_alt_interface(&self, _: UsbDeviceId, _: &InterfaceInfo) -> Result<(), UsbError> {
        Ok(())
    }

    fn set_configuration(&self, _: UsbDeviceId, _: &ConfigurationInfo) -> Result<(), UsbError> {
        Ok(())
    }

    fn device_descriptor(&self, device: UsbDeviceId) -> Option<DeviceDescriptor> {
        self.devices.lock().get(&device).map(|(d, _)| *d)
    }

    fn register_driver(&self, _: &str, supported: &[SupportDescriptor]) -> Result<(), UsbError> {
        if supported.is_empty() {
            Err(UsbError::BadValue)
        } else {
            Ok(())
        }
    }

    fn install_notify(&self, name: &str) -> Result<(), UsbError> {
        self.notified.lock().push(name.to_string());

        Ok(())
    }

    fn uninstall_notify(&self, name: &str) {
        self.notified.lock().retain(|n| n != name)
    }

    fn queue_interrupt(&self, pipe: PipeHandle, transfer: Transfer) -> Result<(), Rejected> {
        self.queue(Target::Pipe(pipe), transfer)
    }

    fn queue_bulk(&self, pipe: PipeHandle, transfer: Transfer) -> Result<(), Rejected> {
        self.queue(Target::Pipe(pipe), transfer)
    }

    fn queue_request(&self, device: UsbDeviceId, request: ControlRequest, transfer: Transfer) -> Result<(), Rejected> {
        self.queue(Target::Control(device, request), transfer)
    }

    fn cancel_queued_transfers(&self, pipe: PipeHandle) -> Result<(), UsbError> {
        self.cancelled.lock().push(pipe);

        let cancelled: Vec<Transfer> = {
            let mut queued = self.queued.lock();

            let (cancelled, kept): (Vec<_>, Vec<_>) = queued.drain(..).partition(|(target, _)| target.is_pipe(pipe));

            *queued = kept;

            cancelled.into_iter().map(|(_, transfer)| transfer).collect()
        };

        for transfer in cancelled {
            transfer.complete(UsbStatus::Canceled, 0);
        }

        Ok(())
    }
}

fn endpoint(pipe: PipeHandle, address: u8, attributes: u8, max_packet_size: u16) -> EndpointInfo {
    EndpointInfo {
        pipe,
        descriptor: EndpointDescriptor {
            address,
            attributes,
            max_packet_size,
        },
    }
}

/// A configuration with the given endpoints on interface `interface_number`
pub fn configuration(interface_number: u8, endpoints: Vec<EndpointInfo>) -> ConfigurationInfo {
    ConfigurationInfo {
        interfaces: vec![InterfaceList {
            alternates: vec![InterfaceInfo {
                interface_number,
                endpoints,
            }],
            active: 0,
        }],
    }
}

pub fn interrupt_in() -> EndpointInfo {
    endpoint(INTERRUPT_IN, 0x81, 0x03, 16)
}

pub fn bulk_in() -> EndpointInfo {
    endpoint(BULK_IN, 0x82, 0x02, 64)
}

pub fn bulk_out() -> EndpointInfo {
    endpoint(BULK_OUT, 0x02, 0x02, 64)
}

/// The configuration of a standard Bluetooth dongle
pub fn standard_configuration() -> ConfigurationInfo {
    configuration(0, vec![interrupt_in(), bulk_in(), bulk_out()])
}

pub fn generic_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x1234,
        product_id: 0x0001,
        device_class: 0xE0,
        device_subclass: 0x01,
        device_protocol: 0x01,
    }
}

pub fn init_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        use simplelog::{Config, LevelFilter, SimpleLogger};

        // another test binary may have already set a logger
        let _ = SimpleLogger::init(LevelFilter::Trace, Config::default());
    });
}

pub struct TestBed {
    pub bus: Arc<UsbSpoof>,
    pub driver: Arc<Driver>,
}

impl TestBed {
    pub fn new(stack: Option<Arc<dyn HciStack>>, port: Option<Arc<dyn EventPort>>, config: DriverConfig) -> Self {
        init_logging();

        let bus = UsbSpoof::new();

        let driver = Driver::new(bus.clone(), stack, port, config);

        driver.init_driver().unwrap();

        TestBed { bus, driver }
    }

    /// A test bed whose packets are forwarded to a `ChannelStack`
    pub fn with_channel_stack(
        config: DriverConfig,
    ) -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<(bo_tie_hci_usb::hci::HciId, bo_tie_hci_usb::hci::HciPacket<Vec<u8>>)>,
    ) {
        let (stack, receiver) = ChannelStack::new();

        (TestBed::new(Some(Arc::new(stack)), None, config), receiver)
    }

    /// Attach a standard dongle
    pub fn attach(&self, id: u32) -> Arc<Device> {
        self.bus
            .plug(UsbDeviceId(id), generic_descriptor(), standard_configuration());

        self.driver.device_added(UsbDeviceId(id)).unwrap()
    }

    /// Attach, open, and bring up a standard dongle
    pub fn attach_and_open(&self, id: u32) -> Arc<Device> {
        let device = self.attach(id);

        let opened = self.driver.open(device.name()).unwrap();

        self.driver
            .control(&opened, bo_tie_hci_usb::hooks::Control::Up)
            .unwrap();

        opened
    }
}
