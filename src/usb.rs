//! The USB side of the driver
//!
//! The driver does not talk to USB hardware itself. Everything USB is done through an implementation
//! of [`UsbBus`] provided by the host environment. This module contains the trait, the descriptor
//! information the bus reports, and the tables of devices the driver supports.

use crate::transactions::Transfer;
use bitflags::bitflags;
use core::fmt;

/// Mask of the direction bit within an endpoint address
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Mask of the transfer type within the attributes of an endpoint
pub const ENDPOINT_ATTR_MASK: u8 = 0x03;

/// Request type of a class specific control request to the device
pub const REQUEST_TYPE_CLASS: u8 = 0x20;

/// Request type of a vendor specific control request to the device
pub const REQUEST_TYPE_VENDOR: u8 = 0x40;

/// The request value of an HCI command sent over the control endpoint
pub const BLUETOOTH_CTRL_REQUEST: u8 = 0x00;

/// Identifier of a device given by the USB bus
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct UsbDeviceId(pub u32);

impl fmt::Display for UsbDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "usb device {}", self.0)
    }
}

/// Handle of an endpoint pipe
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PipeHandle(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
}

/// The kind of transfers an endpoint is used for
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Check if the endpoint transfers data from the device to the host
    pub fn is_in(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & ENDPOINT_ATTR_MASK {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// An endpoint of an interface
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct EndpointInfo {
    pub pipe: PipeHandle,
    pub descriptor: EndpointDescriptor,
}

impl EndpointInfo {
    pub fn max_packet_size(&self) -> usize {
        self.descriptor.max_packet_size.into()
    }
}

/// An (alternate setting of an) interface
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct InterfaceInfo {
    pub interface_number: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// The alternate settings of an interface
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct InterfaceList {
    pub alternates: Vec<InterfaceInfo>,
    /// Index of the active alternate
    pub active: usize,
}

impl InterfaceList {
    /// Get the active alternate setting
    pub fn active(&self) -> Option<&InterfaceInfo> {
        self.alternates.get(self.active)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ConfigurationInfo {
    pub interfaces: Vec<InterfaceList>,
}

/// The setup stage of a control request
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

/// The status a transfer completed with
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UsbStatus {
    Ok,
    /// The transfer was cancelled
    Canceled,
    /// The device no longer answers, it is (most likely) unplugged
    CrcError,
    Stalled,
    Timeout,
    Failed,
}

impl UsbStatus {
    pub fn is_ok(self) -> bool {
        self == UsbStatus::Ok
    }

    /// Check if the endpoint should no longer be polled
    ///
    /// This is true when the transfer was cancelled or when the device is gone.
    pub fn ends_polling(self) -> bool {
        matches!(self, UsbStatus::Canceled | UsbStatus::CrcError)
    }
}

/// Error returned by the USB bus
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsbError {
    #[error("out of memory")]
    NoMemory,
    #[error("endpoint stalled")]
    Stalled,
    #[error("device is gone")]
    NoDevice,
    #[error("bad argument")]
    BadValue,
    #[error("{0}")]
    Other(String),
}

/// A transfer the bus refused to queue
///
/// The transfer is given back so the buffer within it can be reclaimed.
#[derive(Debug)]
pub struct Rejected {
    pub error: UsbError,
    pub transfer: Transfer,
}

impl Rejected {
    pub fn new(error: UsbError, transfer: Transfer) -> Self {
        Rejected { error, transfer }
    }
}

/// The USB bus manager
///
/// Transfers are queued asynchronously. Once a queued transfer finishes, the bus must call
/// [`Transfer::complete`] with the status and the number of bytes transferred. A transfer may be
/// completed from any thread, but [`complete`](Transfer::complete) must not be called while the bus
/// holds a lock it also takes within one of the methods of this trait.
pub trait UsbBus: Send + Sync {
    /// Get a configuration of a device
    fn nth_configuration(&self, device: UsbDeviceId, index: usize) -> Option<ConfigurationInfo>;

    fn set_alt_interface(&self, device: UsbDeviceId, interface: &InterfaceInfo) -> Result<(), UsbError>;

    fn set_configuration(&self, device: UsbDeviceId, configuration: &ConfigurationInfo) -> Result<(), UsbError>;

    fn device_descriptor(&self, device: UsbDeviceId) -> Option<DeviceDescriptor>;

    /// Register a driver for the devices matching any of `supported`
    fn register_driver(&self, name: &str, supported: &[SupportDescriptor]) -> Result<(), UsbError>;

    /// Start delivering device added and removed notifications for the driver `name`
    fn install_notify(&self, name: &str) -> Result<(), UsbError>;

    fn uninstall_notify(&self, name: &str);

    fn queue_interrupt(&self, pipe: PipeHandle, transfer: Transfer) -> Result<(), Rejected>;

    fn queue_bulk(&self, pipe: PipeHandle, transfer: Transfer) -> Result<(), Rejected>;

    /// Queue a request on the default control pipe of a device
    ///
    /// The data stage of the request is the data of `transfer`.
    fn queue_request(&self, device: UsbDeviceId, request: ControlRequest, transfer: Transfer) -> Result<(), Rejected>;

    /// Cancel every transfer queued on a pipe
    ///
    /// Every cancelled transfer is completed with [`UsbStatus::Canceled`].
    fn cancel_queued_transfers(&self, pipe: PipeHandle) -> Result<(), UsbError>;
}

/// A description of devices the driver supports
///
/// A field set to `None` matches anything.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SupportDescriptor {
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
}

impl SupportDescriptor {
    const fn class(class: u8, subclass: u8, protocol: u8) -> Self {
        SupportDescriptor {
            class: Some(class),
            subclass: Some(subclass),
            protocol: Some(protocol),
            vendor: None,
            product: None,
        }
    }

    const fn product(vendor: u16, product: u16) -> Self {
        SupportDescriptor {
            class: None,
            subclass: None,
            protocol: None,
            vendor: Some(vendor),
            product: Some(product),
        }
    }

    /// Check if a device matches this description
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        self.class.map_or(true, |c| c == descriptor.device_class)
            && self.subclass.map_or(true, |s| s == descriptor.device_subclass)
            && self.protocol.map_or(true, |p| p == descriptor.device_protocol)
            && self.vendor.map_or(true, |v| v == descriptor.vendor_id)
            && self.product.map_or(true, |p| p == descriptor.product_id)
    }
}

/// The devices the driver registers for
///
/// Any device of the wireless controller class with the Bluetooth programming interface, and a
/// few dongles that report a vendor specific class.
pub static SUPPORTED_DEVICES: &[SupportDescriptor] = &[
    SupportDescriptor::class(0xE0, 0x01, 0x01),
    // Broadcom BCM2035
    SupportDescriptor::product(0x0A5C, 0x200A),
    SupportDescriptor::product(0x0A5C, 0x2009),
    // AVM BlueFRITZ!
    SupportDescriptor::product(0x057C, 0x3800),
    // IBM/Broadcom
    SupportDescriptor::product(0x04BF, 0x030A),
    // ALPS
    SupportDescriptor::product(0x044E, 0x3001),
    SupportDescriptor::product(0x044E, 0x3002),
    // Ericsson
    SupportDescriptor::product(0x0BDB, 0x1002),
];

bitflags! {
    /// Deviations of a device from the standard Bluetooth USB transport
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct Quirks: u32 {
        /// The device is not driven at all
        const IGNORE = 1 << 0;
        /// The controller must be reset before use
        const NEEDS_RESET = 1 << 1;
        /// SCO data cannot be sent to the controller
        const SCO_NOT_WORKING = 1 << 2;
        /// Commands are sent with vendor requests instead of class requests
        const VENDOR_CONTROL = 1 << 3;
    }
}

impl Quirks {
    /// Get the request type used for sending commands to a device with these quirks
    pub fn request_type(self) -> u8 {
        if self.contains(Quirks::VENDOR_CONTROL) {
            REQUEST_TYPE_VENDOR
        } else {
            REQUEST_TYPE_CLASS
        }
    }
}

/// An entry of the quirk table
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct QuirkEntry {
    pub vendor: u16,
    pub product: u16,
    pub quirks: Quirks,
}

const fn quirk(vendor: u16, product: u16, quirks: Quirks) -> QuirkEntry {
    QuirkEntry { vendor, product, quirks }
}

/// Devices known to deviate from the standard
pub static QUIRK_TABLE: &[QuirkEntry] = &[
    // Broadcom BCM2035
    quirk(0x0A5C, 0x200A, Quirks::NEEDS_RESET.union(Quirks::SCO_NOT_WORKING)),
    quirk(0x0A5C, 0x2009, Quirks::NEEDS_RESET.union(Quirks::SCO_NOT_WORKING)),
    quirk(0x0A5C, 0x2035, Quirks::NEEDS_RESET.union(Quirks::SCO_NOT_WORKING)),
    // Digianswer devices
    quirk(0x08FD, 0x0001, Quirks::VENDOR_CONTROL),
    // Broadcom BCM2033 without firmware
    quirk(0x0A5C, 0x2033, Quirks::IGNORE),
];

/// Look up the quirks of a device
pub fn quirks_of(descriptor: &DeviceDescriptor) -> Quirks {
    QUIRK_TABLE
        .iter()
        .filter(|entry| entry.vendor == descriptor.vendor_id && entry.product == descriptor.product_id)
        .fold(Quirks::empty(), |quirks, entry| quirks | entry.quirks)
}
