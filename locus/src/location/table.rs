use std::collections::HashMap;

use crate::address::Address;
use crate::sync::Ticket;

use super::LocationType;

/// Outstanding relocation lock on one key.
pub(crate) struct LockEntry {
    pub(crate) holder: Address,
    pub(crate) generation: u64,
    pub(crate) ticket: Ticket,
}

/// Entries and outstanding locks of one [`LocationType`].
///
/// Plain data; sequencing is the job of
/// [`LocationService`](super::LocationService).
pub struct LocationTable {
    location_type: LocationType,
    entries: HashMap<u64, Address>,
    locks: HashMap<u64, LockEntry>,
}

impl LocationTable {
    /// Empty table for `location_type`.
    pub fn new(location_type: LocationType) -> Self {
        Self {
            location_type,
            entries: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    /// Namespace of this table.
    pub fn location_type(&self) -> LocationType {
        self.location_type
    }

    /// Stored address, or [`Address::ZERO`].
    pub fn get(&self, id: u64) -> Address {
        self.entries.get(&id).copied().unwrap_or(Address::ZERO)
    }

    /// Store `address` for `id`; a zero address removes the entry.
    pub fn set(&mut self, id: u64, address: Address) {
        if address.is_zero() {
            self.entries.remove(&id);
        } else {
            self.entries.insert(id, address);
        }
    }

    /// Remove `id`, returning what was stored.
    pub fn remove(&mut self, id: u64) -> Option<Address> {
        self.entries.remove(&id)
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no id is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Address the outstanding lock on `id` was taken for.
    pub fn lock_holder(&self, id: u64) -> Option<Address> {
        self.locks.get(&id).map(|entry| entry.holder)
    }

    pub(crate) fn install_lock(&mut self, id: u64, entry: LockEntry) {
        self.locks.insert(id, entry);
    }

    pub(crate) fn take_lock(&mut self, id: u64) -> Option<LockEntry> {
        self.locks.remove(&id)
    }

    /// Take the lock only if it is still the given generation.
    pub(crate) fn take_lock_if(&mut self, id: u64, generation: u64) -> Option<LockEntry> {
        match self.locks.get(&id) {
            Some(entry) if entry.generation == generation => self.locks.remove(&id),
            _ => None,
        }
    }
}
