//! Type erasure between a fiber and its actors.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::address::Address;
use crate::codec::MessageCodec;
use crate::error::{HandlerError, TransferError};
use crate::fiber::Fiber;
use crate::location::LocationType;
use crate::mailbox::TurnHandler;
use crate::messaging::Envelope;

use super::{Actor, HandlerRegistry, SnapshotReader, SnapshotWriter, TransferSnapshot, TurnContext};

/// What a fiber needs from an actor without knowing its type.
pub(crate) trait ErasedActor<C: MessageCodec>: TurnHandler {
    fn kind(&self) -> &'static str;

    fn location(&self) -> Option<(LocationType, u64)>;

    fn snapshot(&self, codec: &C) -> Result<TransferSnapshot, TransferError>;
}

/// One live actor instance plus its handler table.
pub(crate) struct ActorCell<A: Actor, C: MessageCodec> {
    actor: RefCell<A>,
    address: Address,
    registry: Rc<HandlerRegistry<A, C>>,
    fiber: Weak<Fiber<C>>,
}

impl<A: Actor, C: MessageCodec> ActorCell<A, C> {
    pub(crate) fn new(
        actor: A,
        address: Address,
        registry: Rc<HandlerRegistry<A, C>>,
        fiber: Weak<Fiber<C>>,
    ) -> Self {
        Self {
            actor: RefCell::new(actor),
            address,
            registry,
            fiber,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl<A: Actor, C: MessageCodec> TurnHandler for ActorCell<A, C> {
    async fn run_turn(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let Some(fiber) = self.fiber.upgrade() else {
            return Err(HandlerError::Failed("fiber is gone".to_string()));
        };
        let ctx = TurnContext::new(fiber.clone(), self.address, &envelope);

        let outcome = match self.actor.try_borrow_mut() {
            Ok(mut actor) => {
                self.registry
                    .dispatch(&mut *actor, envelope.kind, &envelope.payload, &ctx)
                    .await
            }
            Err(_) => Err(HandlerError::Failed(format!(
                "actor {} is busy outside its turn",
                self.address
            ))),
        };

        fiber.router().reply(&envelope, &outcome);
        outcome.map(|_| ())
    }
}

impl<A: Actor, C: MessageCodec> ErasedActor<C> for ActorCell<A, C> {
    fn kind(&self) -> &'static str {
        A::KIND
    }

    fn location(&self) -> Option<(LocationType, u64)> {
        self.actor
            .try_borrow()
            .ok()
            .and_then(|actor| Actor::location(&*actor))
    }

    fn snapshot(&self, codec: &C) -> Result<TransferSnapshot, TransferError> {
        let actor = self
            .actor
            .try_borrow()
            .map_err(|_| TransferError::Busy(self.address))?;
        let (location_type, location_id) =
            Actor::location(&*actor).ok_or(TransferError::NotLocated(self.address))?;
        let mut writer = SnapshotWriter::new(codec);
        Actor::snapshot(&*actor, &mut writer)?;
        Ok(writer.finish(A::KIND, location_type, location_id))
    }
}

/// Rebuilds actors of one kind from snapshots.
pub(crate) trait Restorer<C: MessageCodec> {
    fn restore(
        &self,
        fiber: &Rc<Fiber<C>>,
        snapshot: &TransferSnapshot,
    ) -> Result<Address, TransferError>;
}

pub(crate) struct TypedRestorer<A: Actor> {
    _marker: PhantomData<fn() -> A>,
}

impl<A: Actor> TypedRestorer<A> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<A: Actor, C: MessageCodec> Restorer<C> for TypedRestorer<A> {
    fn restore(
        &self,
        fiber: &Rc<Fiber<C>>,
        snapshot: &TransferSnapshot,
    ) -> Result<Address, TransferError> {
        let actor = A::restore(&SnapshotReader::new(fiber.codec(), snapshot))?;
        Ok(fiber.spawn(actor)?)
    }
}
