//! Error types for the locus runtime.

use std::time::Duration;

use thiserror::Error;

use crate::address::{Address, FiberId, ProcessId};
use crate::codec::CodecError;
use crate::location::LocationType;
use crate::sync::LockType;

/// Errors produced while packing an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// A field does not fit its bit width.
    #[error("Address field {field} out of range: {value} (max: {max})")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: u64,
        /// Largest value the field can hold.
        max: u64,
    },
}

/// Errors returned by [`AsyncMutex`](crate::sync::AsyncMutex) acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The waiter was not promoted before its deadline.
    #[error("Lock {lock_type:?}/{key} timed out after {waited:?}")]
    Timeout {
        /// Lock namespace.
        lock_type: LockType,
        /// Key within the namespace.
        key: u64,
        /// Deadline that elapsed.
        waited: Duration,
    },

    /// The waiter was cancelled while queued.
    #[error("Lock {lock_type:?}/{key} acquisition cancelled")]
    Cancelled {
        /// Lock namespace.
        lock_type: LockType,
        /// Key within the namespace.
        key: u64,
    },

    /// Requested re-entrancy level exceeds the configured bound.
    #[error("Lock level overflow: {level} (max: {max})")]
    LevelOverflow {
        /// Requested level.
        level: u32,
        /// Configured bound.
        max: u32,
    },
}

/// Errors produced by the location service and its clients.
#[derive(Debug, Error)]
pub enum LocationError {
    /// The stored address does not match the one the locker expected.
    #[error("Location {location_type:?}/{id} is at {actual}, expected {expected}")]
    AddressMismatch {
        /// Namespace of the key.
        location_type: LocationType,
        /// Logical id.
        id: u64,
        /// Address the caller expected.
        expected: Address,
        /// Address actually stored.
        actual: Address,
    },

    /// Unlock issued by a caller that does not own the outstanding lock.
    #[error("Location {location_type:?}/{id} unlock by {caller} but lock held by {held:?}")]
    LockMismatch {
        /// Namespace of the key.
        location_type: LocationType,
        /// Logical id.
        id: u64,
        /// Address the caller claimed to hold the lock for.
        caller: Address,
        /// Holder of the outstanding lock, if any.
        held: Option<Address>,
    },

    /// Acquiring the key failed.
    #[error("Location lock failed: {0}")]
    Lock(#[from] LockError),

    /// Talking to a remote location host failed.
    #[error("Location request failed: {0}")]
    Messaging(#[from] MessagingError),

    /// The remote host reported a failure that has no local variant.
    #[error("Location host error: {0}")]
    Remote(String),
}

/// Errors returned by [`Mailbox`](crate::mailbox::Mailbox) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The mailbox was detached or disposed.
    #[error("Mailbox disposed")]
    Disposed,
}

/// Errors raised while framing envelopes for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The buffer ended before the frame did.
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes left.
        available: usize,
    },

    /// Unknown direction tag.
    #[error("Unknown envelope direction: {0}")]
    UnknownDirection(u8),

    /// Frame exceeds the maximum size.
    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual size.
        size: usize,
        /// Limit.
        max: usize,
    },
}

/// Errors raised by a [`Transport`](crate::messaging::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No route to the destination process.
    #[error("Unknown process: {0:?}")]
    UnknownProcess(ProcessId),

    /// The destination process is unreachable.
    #[error("Process disconnected: {0:?}")]
    Disconnected(ProcessId),

    /// The envelope could not be framed.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors returned by [`MessageRouter`](crate::messaging::MessageRouter).
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No response before the deadline.
    #[error("Call to {to} (rpc {rpc_id}) timed out after {after:?}")]
    Timeout {
        /// Destination of the call.
        to: Address,
        /// Correlation id of the call.
        rpc_id: i32,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The call was cancelled by its caller.
    #[error("Call to {to} (rpc {rpc_id}) cancelled")]
    Cancelled {
        /// Destination of the call.
        to: Address,
        /// Correlation id of the call.
        rpc_id: i32,
    },

    /// No live entity at the destination; re-resolve and retry.
    #[error("No live entity at {to}")]
    Redirect {
        /// Stale destination.
        to: Address,
    },

    /// The destination handler failed.
    #[error("Handler at {to} failed for kind {kind}: {reason}")]
    Handler {
        /// Destination of the call.
        to: Address,
        /// Message kind.
        kind: u16,
        /// Failure reported by the handler.
        reason: String,
    },

    /// The router was shut down while the call was pending.
    #[error("Router closed")]
    Closed,

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload serialization failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors returned by a message handler during a turn.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the kind.
    #[error("Unknown message kind: {0}")]
    UnknownKind(u16),

    /// Payload serialization failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Outgoing message failure.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Location service failure.
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Application failure.
    #[error("{0}")]
    Failed(String),
}

/// Errors returned by [`LocationSender`](crate::messaging::LocationSender).
#[derive(Debug, Error)]
pub enum LocationSendError {
    /// The entity could not be reached within the retry budget.
    #[error("Location {location_type:?}/{id} unreachable after {attempts} attempts")]
    Unreachable {
        /// Namespace of the key.
        location_type: LocationType,
        /// Logical id.
        id: u64,
        /// Attempts made.
        attempts: u32,
    },

    /// Ordering lock failure.
    #[error("Sender lock failed: {0}")]
    Lock(#[from] LockError),

    /// Resolving the entity failed.
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// A non-retryable messaging failure.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

/// Errors raised by fiber lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiberError {
    /// A fiber with the same id already runs in this process.
    #[error("Fiber {0:?} already exists")]
    AlreadyExists(FiberId),

    /// The fiber id does not fit an address.
    #[error("Invalid fiber address: {0}")]
    Address(#[from] AddressError),

    /// Process id 0 would give fiber 0 the unaddressed root address.
    #[error("Process {0:?} is reserved and cannot host fibers")]
    ReservedProcess(ProcessId),

    /// The fiber ran out of entity ids.
    #[error("Fiber {0:?} exhausted its entity ids")]
    EntitiesExhausted(FiberId),

    /// The fiber was shut down.
    #[error("Fiber {0:?} is shut down")]
    ShutDown(FiberId),

    /// The fiber has no location client configured.
    #[error("Fiber {0:?} has no location client")]
    NoLocation(FiberId),
}

/// Errors returned by [`TransferCoordinator`](crate::transfer::TransferCoordinator)
/// and by snapshot restore.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No actor lives at the address on this fiber.
    #[error("No actor at {0}")]
    NotFound(Address),

    /// The actor is running a turn and cannot be captured.
    #[error("Actor at {0} is mid-turn")]
    Busy(Address),

    /// The actor is not registered in any location namespace.
    #[error("Actor at {0} has no location")]
    NotLocated(Address),

    /// The actor type does not support relocation.
    #[error("Actor kind {0} is not transferable")]
    NotTransferable(String),

    /// The destination does not know the actor kind.
    #[error("Unknown actor kind: {0}")]
    UnknownKind(String),

    /// A transferable component is missing from the snapshot.
    #[error("Snapshot missing component {0}")]
    MissingComponent(&'static str),

    /// Component (de)serialization failed.
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] CodecError),

    /// Location lock failed; the actor stays where it was.
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Spawning the restored actor failed.
    #[error("Fiber error: {0}")]
    Fiber(#[from] FiberError),

    /// The destination did not acknowledge; the location was unlocked back.
    #[error("Transfer of {address} rolled back: {source}")]
    RolledBack {
        /// Address the actor still lives at.
        address: Address,
        /// Failure of the destination call.
        #[source]
        source: MessagingError,
    },

    /// The location table could not be brought to a consistent state.
    #[error("Transfer of {address} left location inconsistent: {source}")]
    Fatal {
        /// Address of the actor being moved.
        address: Address,
        /// Failure of the unlock.
        #[source]
        source: LocationError,
    },
}
