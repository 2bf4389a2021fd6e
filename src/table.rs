//! The table of attached devices
//!
//! The table has a fixed number of slots. Every slot carries a generation that is bumped when the
//! slot is emptied, so a [`SlotId`] of a removed device never refers to the device that later takes
//! its slot.
//!
//! The lock of the table is held only while scanning or changing the slots. It is never held while
//! calling into the USB bus or the upper layer.

use crate::{Error, Result};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

/// The number of devices the driver supports at once
pub const MAX_DEVICES: usize = 16;

/// Identifier of a slot within a [`DeviceTable`]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

impl SlotId {
    /// The index of the slot within the table
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    live: usize,
}

/// A fixed capacity table of devices
pub struct DeviceTable<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> DeviceTable<T> {
    /// Create a table with [`MAX_DEVICES`] slots
    pub fn new() -> Self {
        Self::with_capacity(MAX_DEVICES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();

        DeviceTable {
            slots: Mutex::new(Slots { entries, live: 0 }),
        }
    }

    /// Insert a new entry into the first free slot
    ///
    /// The entry is created by `f` with the identifier of the slot it is placed in.
    ///
    /// # Error
    /// `TableFull` is returned if there is no free slot.
    pub fn insert_with<F>(&self, f: F) -> Result<Arc<T>>
    where
        F: FnOnce(SlotId) -> T,
    {
        let mut slots = self.slots.lock();

        let (index, slot) = slots
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.value.is_none())
            .ok_or(Error::TableFull)?;

        let id = SlotId {
            index,
            generation: slot.generation,
        };

        let value = Arc::new(f(id));

        slot.value = Some(value.clone());

        slots.live += 1;

        Ok(value)
    }

    /// Remove the entry of a slot
    ///
    /// `None` is returned when `id` does not refer to a present entry.
    pub fn remove(&self, id: SlotId) -> Option<Arc<T>> {
        let mut slots = self.slots.lock();

        let slot = slots.entries.get_mut(id.index)?;

        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;

        slot.generation = slot.generation.wrapping_add(1);

        slots.live -= 1;

        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<Arc<T>> {
        let slots = self.slots.lock();

        slots
            .entries
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.clone())
    }

    /// Check that `value` is still within the table
    pub fn contains(&self, value: &Arc<T>) -> bool {
        self.slots
            .lock()
            .entries
            .iter()
            .filter_map(|slot| slot.value.as_ref())
            .any(|present| Arc::ptr_eq(present, value))
    }

    /// Find the first entry matching `predicate`
    ///
    /// `predicate` is called with the lock of the table held, it must not call back into the table.
    pub fn find<P>(&self, mut predicate: P) -> Option<Arc<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.slots
            .lock()
            .entries
            .iter()
            .filter_map(|slot| slot.value.as_ref())
            .find(|value| predicate(value))
            .cloned()
    }

    /// Get every present entry
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.slots
            .lock()
            .entries
            .iter()
            .filter_map(|slot| slot.value.clone())
            .collect()
    }

    /// The number of present entries
    pub fn len(&self) -> usize {
        self.slots.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().entries.len()
    }
}

impl<T> Default for DeviceTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
