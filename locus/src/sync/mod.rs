//! Single-fiber synchronization primitives.

mod async_mutex;
mod cancel;

pub use async_mutex::{AsyncMutex, LockType, Ticket};
pub use cancel::CancellationToken;
