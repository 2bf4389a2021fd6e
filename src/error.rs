//! Errors of the driver

use crate::hci::PacketType;
use crate::upper::PortError;
use crate::usb::UsbError;
use nix::errno::Errno;

/// Error returned by operations of the driver
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Every slot of the device table is taken
    #[error("device table full")]
    TableFull,
    /// The USB device is not one this driver can (or should) drive
    #[error("no such device")]
    NoDevice,
    /// No device matches the name or HCI identifier
    #[error("device not found")]
    NotFound,
    #[error("device already running")]
    AlreadyRunning,
    #[error("device not ready")]
    NotReady,
    #[error("bad value")]
    BadValue,
    /// A new frame started with a chunk shorter than the frame's header
    #[error("illegal byte sequence within {0} frame")]
    IllegalSequence(PacketType),
    #[error("the interrupt-in, bulk-in, and bulk-out endpoints are required")]
    MissingEndpoints,
    #[error("unexpected active interface number {0}")]
    UnexpectedInterface(u8),
    #[error("the device has no usable configuration")]
    NoConfiguration,
    #[error("operation not supported")]
    NotSupported,
    #[error("usb: {0}")]
    Usb(#[from] UsbError),
    #[error("event port: {0}")]
    Port(#[from] PortError),
}

impl Error {
    /// Get the `errno` equivalent of this error
    ///
    /// This is the status code reported by the driver hooks.
    pub fn errno(&self) -> Errno {
        match self {
            Error::TableFull => Errno::ENOMEM,
            Error::NoDevice | Error::NotFound => Errno::ENODEV,
            Error::AlreadyRunning => Errno::EBUSY,
            Error::NotReady => Errno::EAGAIN,
            Error::BadValue => Errno::EINVAL,
            Error::IllegalSequence(_) => Errno::EILSEQ,
            Error::MissingEndpoints | Error::UnexpectedInterface(_) | Error::NoConfiguration => Errno::ENODEV,
            Error::NotSupported => Errno::ENOTSUP,
            Error::Usb(UsbError::NoMemory) => Errno::ENOMEM,
            Error::Usb(_) => Errno::EIO,
            Error::Port(PortError::Timeout) => Errno::ETIMEDOUT,
            Error::Port(_) => Errno::EPIPE,
        }
    }
}

/// Result type of the driver
pub type Result<T> = core::result::Result<T, Error>;
