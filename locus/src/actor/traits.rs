//! Core traits implemented by application actors and messages.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MessageCodec;
use crate::error::{HandlerError, TransferError};
use crate::location::LocationType;

use super::{HandlerRegistry, SnapshotReader, SnapshotWriter, TurnContext};

/// A message type with a stable wire kind.
///
/// Kinds at or above [`kinds::SYSTEM_BASE`](crate::messaging::kinds::SYSTEM_BASE)
/// are reserved for the runtime.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Move { x: f32, y: f32 }
///
/// impl Message for Move {
///     const KIND: u16 = 101;
///     type Response = ();
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + 'static {
    /// Wire kind, unique per message type.
    const KIND: u16;

    /// Reply type; `()` for messages nobody waits on.
    type Response: Serialize + DeserializeOwned + 'static;
}

/// An entity that lives in a fiber and processes messages one turn at a time.
///
/// Handlers are listed explicitly in [`register_handlers`](Actor::register_handlers).
/// Actors that can be relocated also implement [`snapshot`](Actor::snapshot)
/// and [`restore`](Actor::restore), and report their key through
/// [`location`](Actor::location).
///
/// # Example
///
/// ```rust,ignore
/// struct Unit { id: u64, position: Position }
///
/// impl Actor for Unit {
///     const KIND: &'static str = "unit";
///
///     fn register_handlers<C: MessageCodec>(registry: &mut HandlerRegistry<Self, C>) {
///         registry.register::<Move>().register::<GetPosition>();
///     }
///
///     fn location(&self) -> Option<(LocationType, u64)> {
///         Some((LocationType::Unit, self.id))
///     }
///
///     fn snapshot<C: MessageCodec>(&self, out: &mut SnapshotWriter<'_, C>) -> Result<(), TransferError> {
///         out.put(&self.position)
///     }
///
///     fn restore<C: MessageCodec>(snapshot: &SnapshotReader<'_, C>) -> Result<Self, TransferError> {
///         let (_, id) = snapshot.location();
///         Ok(Unit { id, position: snapshot.get()? })
///     }
/// }
/// ```
pub trait Actor: Sized + 'static {
    /// Stable name used to restore the actor on another fiber.
    const KIND: &'static str;

    /// Declare the messages this actor handles.
    fn register_handlers<C: MessageCodec>(registry: &mut HandlerRegistry<Self, C>);

    /// Location key this actor is registered under, if any.
    fn location(&self) -> Option<(LocationType, u64)> {
        None
    }

    /// Write every transferable component.
    fn snapshot<C: MessageCodec>(
        &self,
        _snapshot: &mut SnapshotWriter<'_, C>,
    ) -> Result<(), TransferError> {
        Err(TransferError::NotTransferable(Self::KIND.to_string()))
    }

    /// Rebuild the actor from a snapshot taken on another fiber.
    fn restore<C: MessageCodec>(_snapshot: &SnapshotReader<'_, C>) -> Result<Self, TransferError> {
        Err(TransferError::NotTransferable(Self::KIND.to_string()))
    }
}

/// Handling of one message type by an actor.
///
/// Runs inside the actor's turn: no other message for this actor starts
/// until the returned future completes.
#[async_trait::async_trait(?Send)]
pub trait Handler<M: Message>: Actor {
    /// Process `message` and produce its reply.
    async fn handle<C: MessageCodec>(
        &mut self,
        message: M,
        ctx: &TurnContext<C>,
    ) -> Result<M::Response, HandlerError>;
}
