//! Fixed pool of connection slots.

use log::*;

use crate::radio::NativeConn;

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    native: Option<NativeConn>,
    /// Set between `acquire` and `release`, including while a connect request is in flight
    /// and `native` isn't known yet.
    taken: bool,
}

/// Array of slots plus a LIFO free list of their indices.
///
/// Not synchronized by itself; `Central` keeps it behind a single mutex.
#[derive(Debug)]
pub(in crate) struct SlotAllocator {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::default(); capacity],
            // Lowest index on top.
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently taken.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Pops the top of the free list, `None` when all slots are taken.
    pub fn acquire(&mut self) -> Option<usize> {
        let key = self.free.pop()?;
        self.slots[key].taken = true;
        debug!("slot #{} acquired ({}/{} in use)", key, self.in_use(), self.capacity());
        Some(key)
    }

    /// Clears the slot and pushes it back onto the free list.
    ///
    /// Returns the native reference the slot was bound to. Releasing a free slot is a no-op
    /// that returns `None`.
    pub fn release(&mut self, key: usize) -> Option<NativeConn> {
        let slot = self.slots.get_mut(key)?;
        if !slot.taken {
            warn!("slot #{} released while free", key);
            return None;
        }
        let native = slot.native.take();
        slot.taken = false;
        self.free.push(key);
        debug!("slot #{} released ({}/{} in use)", key, self.in_use(), self.capacity());
        native
    }

    /// Binds a taken slot to a native connection. Fails if the key is out of range, the slot is
    /// free, or `native` is already bound to another slot.
    pub fn bind(&mut self, key: usize, native: NativeConn) -> bool {
        if self.find(native).map_or(false, |k| k != key) {
            warn!("{:?} already bound to another slot", native);
            return false;
        }
        match self.slots.get_mut(key) {
            Some(slot) if slot.taken => {
                slot.native = Some(native);
                true
            }
            _ => false,
        }
    }

    /// Detaches the native connection from a slot that stays taken until `release`.
    pub fn unbind(&mut self, key: usize) -> Option<NativeConn> {
        let native = self.slots.get_mut(key).and_then(|s| s.native.take());
        if native.is_some() {
            trace!("slot #{} unbound", key);
        }
        native
    }

    /// Native connection bound to the slot.
    pub fn resolve(&self, key: usize) -> Option<NativeConn> {
        self.slots.get(key).and_then(|s| s.native)
    }

    /// Slot bound to the native connection.
    pub fn find(&self, native: NativeConn) -> Option<usize> {
        self.slots.iter().position(|s| s.native == Some(native))
    }
}
