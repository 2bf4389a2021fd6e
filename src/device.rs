//! The record of an attached device

use crate::assembler::FrameAssembler;
use crate::buffer::{RecycleList, Room};
use crate::config::DriverConfig;
use crate::hci::HciId;
use crate::scheduler::TxScheduler;
use crate::stats::{HciStatistics, Statistics};
use crate::table::SlotId;
use crate::usb::{EndpointInfo, Quirks, UsbDeviceId};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;

bitflags! {
    /// State flags of a device
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct DeviceFlags: u32 {
        /// The device was opened and may transfer packets
        const RUNNING = 1 << 0;
    }
}

const NO_HCI_ID: u32 = u32::MAX;

/// The endpoints and control settings of a configured device
#[derive(Copy, Clone, Debug)]
pub struct UsbSetup {
    pub interrupt_in: EndpointInfo,
    pub bulk_in: EndpointInfo,
    pub bulk_out: EndpointInfo,
    /// Request type of the control requests carrying commands
    pub request_type: u8,
    pub quirks: Quirks,
}

/// An attached Bluetooth controller
pub struct Device {
    usb: UsbDeviceId,
    slot: SlotId,
    name: String,
    hci_id: AtomicU32,
    connected: AtomicBool,
    open_count: AtomicU32,
    flags: AtomicU32,
    setup: OnceLock<UsbSetup>,
    pub(crate) tx: TxScheduler,
    pub(crate) rx: Mutex<FrameAssembler>,
    pub(crate) event_room: Room,
    pub(crate) acl_room: Room,
    pub(crate) recycle: Mutex<RecycleList>,
    pub(crate) stats: Statistics,
    /// Serializes the control path of the device
    pub(crate) lock: Mutex<()>,
}

impl Device {
    pub(crate) fn new(usb: UsbDeviceId, slot: SlotId, config: &DriverConfig) -> Self {
        Device {
            usb,
            slot,
            name: format!("{}/{}", config.device_path, slot.index()),
            hci_id: AtomicU32::new(NO_HCI_ID),
            connected: AtomicBool::new(false),
            open_count: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            setup: OnceLock::new(),
            tx: TxScheduler::new(config.command_drain),
            rx: Mutex::new(FrameAssembler::new()),
            event_room: Room::new(),
            acl_room: Room::new(),
            recycle: Mutex::new(RecycleList::new()),
            stats: Statistics::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn usb_id(&self) -> UsbDeviceId {
        self.usb
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// The name the device is published under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the HCI identifier assigned when the device was opened
    pub fn hci_id(&self) -> Option<HciId> {
        match self.hci_id.load(Ordering::Acquire) {
            NO_HCI_ID => None,
            id => Some(HciId(id)),
        }
    }

    pub(crate) fn set_hci_id(&self, id: Option<HciId>) {
        self.hci_id
            .store(id.map_or(NO_HCI_ID, |id| id.0), Ordering::Release)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release)
    }

    /// The number of open sessions
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Relaxed)
    }

    pub(crate) fn opened(&self) {
        self.open_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn closed(&self) {
        let _ = self
            .open_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| count.checked_sub(1));
    }

    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.flags().contains(DeviceFlags::RUNNING)
    }

    /// Set flags, returning true if all of them were already set
    pub(crate) fn test_and_set(&self, flags: DeviceFlags) -> bool {
        let previous = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);

        DeviceFlags::from_bits_truncate(previous).contains(flags)
    }

    /// Clear flags, returning true if all of them were set
    pub(crate) fn test_and_clear(&self, flags: DeviceFlags) -> bool {
        let previous = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);

        DeviceFlags::from_bits_truncate(previous).contains(flags)
    }

    /// Get the USB setup of the device
    ///
    /// This is `None` until the device is configured.
    pub fn setup(&self) -> Option<&UsbSetup> {
        self.setup.get()
    }

    /// Get the quirks of the device
    ///
    /// A device that was never configured has no quirks.
    pub fn quirks(&self) -> Quirks {
        self.setup().map(|setup| setup.quirks).unwrap_or_default()
    }

    pub(crate) fn set_setup(&self, setup: UsbSetup) {
        if self.setup.set(setup).is_err() {
            log::error!("{} was already configured", self.name);
        }
    }

    /// The transmit queues of the device
    pub fn tx_queues(&self) -> &TxScheduler {
        &self.tx
    }

    pub fn event_room(&self) -> &Room {
        &self.event_room
    }

    pub fn acl_room(&self) -> &Room {
        &self.acl_room
    }

    /// The number of buffers parked within the recycle list
    pub fn parked(&self) -> usize {
        self.recycle.lock().len()
    }

    pub fn statistics(&self) -> HciStatistics {
        self.stats.snapshot()
    }

    /// Free every buffer held by the device
    ///
    /// This empties the transmit queues, drops any partially assembled frame, and purges the rooms
    /// and recycle list.
    pub(crate) fn release_buffers(&self) {
        let queued = self.tx.clear();
        let partial = self.rx.lock().reset();
        let rooms = self.event_room.purge() + self.acl_room.purge();
        let parked = self.recycle.lock().purge();

        log::debug!(
            "{}: freed {} queued, {} partial, {} room, and {} parked buffers",
            self.name,
            queued,
            partial,
            rooms,
            parked
        );
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("usb", &self.usb)
            .field("hci_id", &self.hci_id())
            .field("connected", &self.is_connected())
            .field("flags", &self.flags())
            .finish()
    }
}
