//! Logical id → current address, with locked relocation.
//!
//! Entities that can move register under a `(LocationType, id)` key. Senders
//! resolve the key to find where the entity currently lives. Relocation goes
//! through a `lock`/`unlock` pair on the key so that:
//!
//! - readers keep seeing the old address until the new one is installed,
//! - a second relocation of the same entity queues behind the first,
//! - an unlock by anyone but the lock holder is refused.
//!
//! ```text
//!            lock(k, A)              unlock(k, A, B)
//!   Free ──▶ Locking ──▶ Locked(A) ─────────────────▶ Free (k → B)
//!                 ▲         │
//!                 │         └─ hold deadline elapsed: error log, k stays → A
//!   queued lock ──┘
//! ```
//!
//! [`LocationService`] owns the tables on one fiber. Other fibers reach it
//! through a [`LocationProxy`]; both implement [`LocationClient`].

mod client;
mod proxy;
mod service;
mod table;

use serde::{Deserialize, Serialize};

pub use client::LocationClient;
pub use proxy::LocationProxy;
pub(crate) use proxy::serve;
pub use service::LocationService;
pub use table::LocationTable;

/// Namespace of logical ids. Each variant owns an independent key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocationType {
    /// Units in the world.
    Unit,
    /// Player accounts.
    Player,
    /// Friend lists.
    Friend,
    /// Chat members.
    Chat,
    /// Gate sessions.
    GateSession,
    /// Mailboxes of in-game mail.
    Mail,
}

impl LocationType {
    /// Every namespace, in declaration order.
    pub const ALL: [LocationType; 6] = [
        LocationType::Unit,
        LocationType::Player,
        LocationType::Friend,
        LocationType::Chat,
        LocationType::GateSession,
        LocationType::Mail,
    ];
}
