//! Packed entity addresses.
//!
//! An [`Address`] identifies one routable endpoint: an entity living inside a
//! fiber of a process. The three coordinates are packed into a single `u64`
//! so addresses are cheap to copy, hash and put on the wire.
//!
//! # Layout
//!
//! ```text
//!  63            46 45         32 31                       0
//! ┌────────────────┬─────────────┬──────────────────────────┐
//! │ process (18)   │ fiber (14)  │ entity (32)              │
//! └────────────────┴─────────────┴──────────────────────────┘
//! ```
//!
//! This module is the only place that interprets the bit layout. Entity `0`
//! of a fiber is the fiber's root address, used for fiber-level services
//! and by callers that are not actors.
//!
//! # Example
//!
//! ```rust
//! use locus::{Address, EntityId, FiberId, ProcessId};
//!
//! let addr = Address::encode(ProcessId(3), FiberId(7), EntityId(42)).unwrap();
//! assert_eq!(addr.decode(), (ProcessId(3), FiberId(7), EntityId(42)));
//!
//! let moved = addr.rewrite_process(ProcessId(4)).unwrap();
//! assert_eq!(moved.process(), ProcessId(4));
//! assert_eq!(moved.entity(), EntityId(42));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

const PROCESS_BITS: u32 = 18;
const FIBER_BITS: u32 = 14;
const ENTITY_BITS: u32 = 32;

const FIBER_SHIFT: u32 = ENTITY_BITS;
const PROCESS_SHIFT: u32 = ENTITY_BITS + FIBER_BITS;

const PROCESS_MAX: u64 = (1 << PROCESS_BITS) - 1;
const FIBER_MAX: u64 = (1 << FIBER_BITS) - 1;
const ENTITY_MAX: u64 = (1 << ENTITY_BITS) - 1;

/// Identifier of an OS process participating in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

/// Identifier of a fiber, unique within its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiberId(pub u32);

/// Identifier of an entity, unique within its fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// The fiber's own endpoint.
    pub const ROOT: EntityId = EntityId(0);
}

/// A packed `(process, fiber, entity)` triple.
///
/// `Address::ZERO` means "unaddressed" and is what lookups return for
/// unknown keys. It is also the packing of `0:0:0`, so process 0 never
/// hosts fibers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    /// The unaddressed value.
    pub const ZERO: Address = Address(0);

    /// Pack the three coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::OutOfRange`] naming the first field that does
    /// not fit its bit width. Nothing is encoded in that case.
    pub fn encode(
        process: ProcessId,
        fiber: FiberId,
        entity: EntityId,
    ) -> Result<Self, AddressError> {
        let process = check("process", process.0 as u64, PROCESS_MAX)?;
        let fiber = check("fiber", fiber.0 as u64, FIBER_MAX)?;
        let entity = check("entity", entity.0 as u64, ENTITY_MAX)?;
        Ok(Address(
            (process << PROCESS_SHIFT) | (fiber << FIBER_SHIFT) | entity,
        ))
    }

    /// Unpack into `(process, fiber, entity)`.
    pub fn decode(self) -> (ProcessId, FiberId, EntityId) {
        (self.process(), self.fiber(), self.entity())
    }

    /// Same fiber and entity, different process.
    pub fn rewrite_process(self, process: ProcessId) -> Result<Self, AddressError> {
        Self::encode(process, self.fiber(), self.entity())
    }

    /// Root address of the fiber this address belongs to.
    pub fn fiber_root(self) -> Self {
        Address(self.0 & !ENTITY_MAX)
    }

    /// Process coordinate.
    pub fn process(self) -> ProcessId {
        ProcessId((self.0 >> PROCESS_SHIFT) as u32)
    }

    /// Fiber coordinate.
    pub fn fiber(self) -> FiberId {
        FiberId(((self.0 >> FIBER_SHIFT) & FIBER_MAX) as u32)
    }

    /// Entity coordinate.
    pub fn entity(self) -> EntityId {
        EntityId((self.0 & ENTITY_MAX) as u32)
    }

    /// True for [`Address::ZERO`].
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// True when this is a fiber root address (entity `0`).
    pub fn is_root(self) -> bool {
        self.entity() == EntityId::ROOT
    }

    /// Raw packed value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw packed value. Every `u64` is a valid layout.
    pub fn from_u64(raw: u64) -> Self {
        Address(raw)
    }
}

fn check(field: &'static str, value: u64, max: u64) -> Result<u64, AddressError> {
    if value > max {
        tracing::error!(field, value, max, "address field out of range");
        return Err(AddressError::OutOfRange { field, value, max });
    }
    Ok(value)
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.process().0,
            self.fiber().0,
            self.entity().0
        )
    }
}
