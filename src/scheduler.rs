//! Transmission scheduling
//!
//! Packets sent to the controller are queued per channel and then submitted to the USB bus by a
//! *drain pass* of the scheduler. Only one execution context may drain the queues of a device at a
//! time. A context that wants to drain while another context is already draining does not wait,
//! it leaves a request for another pass and returns. The draining context checks for this request
//! once it has finished a pass and, if it was made, drains again.
//!
//! ```
//! use bo_tie_hci_usb::buffer::SnetBuffer;
//! use bo_tie_hci_usb::config::CommandDrain;
//! use bo_tie_hci_usb::scheduler::{TxEntry, TxScheduler};
//!
//! let scheduler = TxScheduler::new(CommandDrain::Exhaustive);
//!
//! scheduler.enqueue(TxEntry::Command(SnetBuffer::from_packet(&[0x03, 0x0c, 0x00])));
//!
//! let mut sent = Vec::new();
//!
//! assert!(scheduler.schedule(|entry| {
//!     sent.push(entry.as_slice().to_vec());
//!     Ok(())
//! }));
//!
//! assert_eq!(sent, vec![vec![0x03, 0x0c, 0x00]]);
//! ```

use crate::buffer::{NetBuffer, SnetBuffer};
use crate::config::CommandDrain;
use crate::hci::PacketType;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};

/// An entry of a transmit queue
#[derive(Debug)]
pub enum TxEntry {
    Command(SnetBuffer),
    Acl(NetBuffer),
    Sco(NetBuffer),
}

impl TxEntry {
    pub fn packet_type(&self) -> PacketType {
        match self {
            TxEntry::Command(_) => PacketType::Command,
            TxEntry::Acl(_) => PacketType::Acl,
            TxEntry::Sco(_) => PacketType::Sco,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            TxEntry::Command(buffer) => buffer.as_slice(),
            TxEntry::Acl(buffer) | TxEntry::Sco(buffer) => buffer.as_slice(),
        }
    }
}

/// State of the scheduler
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// No context is draining the queues
    Idle,
    /// A context is draining the queues
    Processing,
    /// A context is draining the queues and another pass was requested
    PendingMore,
}

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;
const PENDING_MORE: u8 = 2;

#[derive(Default)]
struct TxQueues {
    command: VecDeque<SnetBuffer>,
    acl: VecDeque<NetBuffer>,
    sco: VecDeque<NetBuffer>,
}

/// The transmit queues of a device and their scheduler
pub struct TxScheduler {
    state: AtomicU8,
    queues: Mutex<TxQueues>,
    command_drain: CommandDrain,
}

impl TxScheduler {
    pub fn new(command_drain: CommandDrain) -> Self {
        TxScheduler {
            state: AtomicU8::new(IDLE),
            queues: Mutex::new(TxQueues::default()),
            command_drain,
        }
    }

    /// Add an entry to the tail of its channel's queue
    pub fn enqueue(&self, entry: TxEntry) {
        let mut queues = self.queues.lock();

        match entry {
            TxEntry::Command(buffer) => queues.command.push_back(buffer),
            TxEntry::Acl(buffer) => queues.acl.push_back(buffer),
            TxEntry::Sco(buffer) => queues.sco.push_back(buffer),
        }
    }

    /// Put an entry that failed to be submitted back at the head of its channel's queue
    fn requeue(&self, entry: TxEntry) {
        let mut queues = self.queues.lock();

        match entry {
            TxEntry::Command(buffer) => queues.command.push_front(buffer),
            TxEntry::Acl(buffer) => queues.acl.push_front(buffer),
            TxEntry::Sco(buffer) => queues.sco.push_front(buffer),
        }
    }

    /// Get the number of entries waiting within a channel's queue
    pub fn pending(&self, packet_type: PacketType) -> usize {
        let queues = self.queues.lock();

        match packet_type {
            PacketType::Command => queues.command.len(),
            PacketType::Acl => queues.acl.len(),
            PacketType::Sco => queues.sco.len(),
            PacketType::Event => 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self.state.load(Ordering::Acquire) {
            IDLE => SchedulerState::Idle,
            PROCESSING => SchedulerState::Processing,
            _ => SchedulerState::PendingMore,
        }
    }

    /// Free every queued entry
    ///
    /// The number of freed entries is returned.
    pub fn clear(&self) -> usize {
        let mut queues = self.queues.lock();

        let count = queues.command.len() + queues.acl.len() + queues.sco.len();

        *queues = TxQueues::default();

        count
    }

    /// Drain the queues
    ///
    /// Entries are given to `submit` starting with the command queue followed by the ACL queue. An
    /// entry that cannot be submitted must be returned by `submit` within the `Err`, it is put back
    /// at the head of its queue and that queue is not drained any further within the pass. The SCO
    /// queue is never drained.
    ///
    /// If another context is currently draining, this only requests another pass from that context
    /// and returns `false`. Otherwise the queues are drained until no further pass is requested and
    /// `true` is returned.
    pub fn schedule<S>(&self, mut submit: S) -> bool
    where
        S: FnMut(TxEntry) -> Result<(), TxEntry>,
    {
        if !self.claim() {
            log::trace!("drain pass already in progress, requested another pass");

            return false;
        }

        loop {
            self.drain_pass(&mut submit);

            match self
                .state
                .compare_exchange(PROCESSING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break true,
                // Only this context can leave `PENDING_MORE`
                Err(_) => self.state.store(PROCESSING, Ordering::Release),
            }
        }
    }

    /// Try to become the draining context
    ///
    /// If another context is draining then another pass is requested from it.
    fn claim(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            let next = if current == IDLE { PROCESSING } else { PENDING_MORE };

            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    fn drain_pass<S>(&self, submit: &mut S)
    where
        S: FnMut(TxEntry) -> Result<(), TxEntry>,
    {
        loop {
            let next = self.queues.lock().command.pop_front();

            let Some(buffer) = next else { break };

            if let Err(entry) = submit(TxEntry::Command(buffer)) {
                self.requeue(entry);
                break;
            }

            if let CommandDrain::OnePerPass = self.command_drain {
                break;
            }
        }

        loop {
            let next = self.queues.lock().acl.pop_front();

            let Some(buffer) = next else { break };

            if let Err(entry) = submit(TxEntry::Acl(buffer)) {
                self.requeue(entry);
                break;
            }
        }
    }
}
