//! Processes and the fibers they host.
//!
//! A [`Process`] is shared across threads and only routes. Each [`Fiber`]
//! runs on one `LocalSet` and owns everything an actor can touch.

#[allow(clippy::module_inception)]
mod fiber;
mod process;

pub use fiber::{Fiber, SystemFuture, SystemHandler};
pub use process::{FiberInbox, Inbound, Process, WeakProcess};
