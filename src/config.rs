//! Configuration of the driver
//!
//! ```
//! use bo_tie_hci_usb::config::{CommandDrain, DriverConfig};
//!
//! let config = DriverConfig::default()
//!     .command_drain(CommandDrain::Exhaustive)
//!     .reschedule_after_completion(true);
//!
//! assert_eq!(config.acl_rx_window, 1);
//! ```

use std::time::Duration;

/// The path devices are published under
pub const DEFAULT_DEVICE_PATH: &str = "bluetooth/h2generic";

/// How many commands a drain pass submits
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandDrain {
    /// Submit at most one command per pass
    ///
    /// This keeps the command queue from starving the ACL queue.
    #[default]
    OnePerPass,
    /// Submit commands until the command queue is empty
    Exhaustive,
}

/// Runtime options of the driver
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverConfig {
    /// Number of commands submitted by a drain pass of the transmit scheduler
    pub command_drain: CommandDrain,
    /// Run the transmit scheduler again whenever a transmit transfer completes
    ///
    /// Without this the scheduler only runs when the upper layer sends a packet.
    pub reschedule_after_completion: bool,
    /// Number of ACL receive transfers kept queued on the bulk-in endpoint
    pub acl_rx_window: usize,
    /// How long a write of an event to the userland port may block
    pub event_port_timeout: Duration,
    /// The path the devices are published under
    pub device_path: String,
}

impl DriverConfig {
    pub fn command_drain(mut self, command_drain: CommandDrain) -> Self {
        self.command_drain = command_drain;
        self
    }

    pub fn reschedule_after_completion(mut self, enable: bool) -> Self {
        self.reschedule_after_completion = enable;
        self
    }

    /// Set the number of ACL receive transfers
    ///
    /// # Panic
    /// `window` cannot be zero.
    pub fn acl_rx_window(mut self, window: usize) -> Self {
        assert_ne!(window, 0, "at least one ACL receive transfer is required");

        self.acl_rx_window = window;
        self
    }

    pub fn event_port_timeout(mut self, timeout: Duration) -> Self {
        self.event_port_timeout = timeout;
        self
    }

    pub fn device_path<T: Into<String>>(mut self, path: T) -> Self {
        self.device_path = path.into();
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            command_drain: CommandDrain::OnePerPass,
            reschedule_after_completion: false,
            acl_rx_window: 1,
            event_port_timeout: Duration::from_secs(1),
            device_path: DEFAULT_DEVICE_PATH.to_string(),
        }
    }
}
