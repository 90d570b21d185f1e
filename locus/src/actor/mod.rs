//! Actors, messages and their dispatch.
//!
//! An [`Actor`] lives on one fiber at one [`Address`](crate::Address). It
//! declares the messages it understands in
//! [`register_handlers`](Actor::register_handlers); the fiber builds the
//! resulting [`HandlerRegistry`] once per actor type and runs every inbound
//! message as a turn through the actor's mailbox.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Serialize, Deserialize)]
//! struct Ping(u32);
//!
//! impl Message for Ping {
//!     const KIND: u16 = 1;
//!     type Response = u32;
//! }
//!
//! struct Echo;
//!
//! impl Actor for Echo {
//!     const KIND: &'static str = "echo";
//!
//!     fn register_handlers<C: MessageCodec>(registry: &mut HandlerRegistry<Self, C>) {
//!         registry.register::<Ping>();
//!     }
//! }
//!
//! #[async_trait::async_trait(?Send)]
//! impl Handler<Ping> for Echo {
//!     async fn handle<C: MessageCodec>(&mut self, msg: Ping, _ctx: &TurnContext<C>) -> Result<u32, HandlerError> {
//!         Ok(msg.0)
//!     }
//! }
//! ```

mod cell;
mod context;
mod handlers;
mod snapshot;
mod traits;

pub(crate) use cell::{ActorCell, ErasedActor, Restorer, TypedRestorer};
pub use context::TurnContext;
pub use handlers::HandlerRegistry;
pub use snapshot::{SnapshotReader, SnapshotWriter, TransferSnapshot, Transferable};
pub use traits::{Actor, Handler, Message};
