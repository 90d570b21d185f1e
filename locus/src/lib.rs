//! # Locus
//!
//! Location-transparent actors on single-threaded fibers.
//!
//! Entities live at an [`Address`] (process, fiber, entity). Entities that
//! can move also register under a logical `(LocationType, id)` key in a
//! location service; senders resolve the key, relocations lock it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────── Process (Send + Sync) ─────────────────────────────┐
//! │  fiber id → inbox                                   Transport to other processes   │
//! ├────────────────────────────────────────┬───────────────────────────────────────────┤
//! │ Fiber (LocalSet)                       │ Fiber (LocalSet)                          │
//! │  MessageRouter  PendingCalls           │  MessageRouter  PendingCalls              │
//! │  AsyncMutex     actors + Mailboxes     │  AsyncMutex     actors + Mailboxes        │
//! │  LocationService (host)  ◀──────────── │  LocationProxy                            │
//! │  TransferCoordinator                   │  LocationSender                           │
//! └────────────────────────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! Everything below [`Process`](fiber::Process) is `!Send` and owned by its
//! fiber; fibers only talk through envelopes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use locus::{Fiber, FiberConfig, FiberId, JsonCodec, LocalNetwork, Process, ProcessId};
//!
//! let network = LocalNetwork::new();
//! let process = Process::new(ProcessId(1), network.clone());
//! network.attach(&process);
//!
//! LocalSet::new().run_until(async {
//!     let fiber = Fiber::start(&process, FiberId(0), JsonCodec, FiberConfig::default())?;
//!     let echo = fiber.spawn(Echo)?;
//!     assert_eq!(fiber.call(echo, &Ping(7)).await?, 7);
//! }).await;
//! ```
//!
//! ## Modules
//!
//! - [`address`] - Address packing
//! - [`sync`] - Keyed re-entrant async mutex and cancellation
//! - [`mailbox`] - Ordered per-entity turns
//! - [`messaging`] - Envelopes, calls, transports, location-addressed sends
//! - [`location`] - Location tables, service and proxy
//! - [`actor`] - Actor, message and handler traits
//! - [`fiber`] - Processes and fibers
//! - [`transfer`] - Actor relocation

#![warn(missing_docs)]

pub mod actor;
pub mod address;
pub mod codec;
pub mod config;
pub mod error;
pub mod fiber;
pub mod location;
pub mod mailbox;
pub mod messaging;
pub mod sync;
pub mod transfer;

pub use actor::{Actor, Handler, HandlerRegistry, Message, TurnContext};
pub use address::{Address, EntityId, FiberId, ProcessId};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::{FiberConfig, FiberConfigBuilder};
pub use error::{
    AddressError, FiberError, HandlerError, LocationError, LocationSendError, LockError,
    MessagingError, TransferError,
};
pub use fiber::{Fiber, Process};
pub use location::{LocationClient, LocationType};
pub use messaging::{LocalNetwork, LocationSender};
pub use transfer::TransferCoordinator;
