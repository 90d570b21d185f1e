use std::rc::Rc;

use crate::address::Address;
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{FiberError, MessagingError};
use crate::fiber::Fiber;
use crate::messaging::{Direction, Envelope};
use crate::transfer::TransferCoordinator;

use super::{Actor, Message};

/// What a handler can see and do during one turn.
pub struct TurnContext<C: MessageCodec = JsonCodec> {
    fiber: Rc<Fiber<C>>,
    address: Address,
    sender: Address,
    kind: u16,
    direction: Direction,
}

impl<C: MessageCodec> TurnContext<C> {
    pub(crate) fn new(fiber: Rc<Fiber<C>>, address: Address, envelope: &Envelope) -> Self {
        Self {
            fiber,
            address,
            sender: envelope.from,
            kind: envelope.kind,
            direction: envelope.direction,
        }
    }

    /// Address of the actor running the turn.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Address the current message came from.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Kind of the current message.
    pub fn kind(&self) -> u16 {
        self.kind
    }

    /// Whether the sender waits for a reply.
    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }

    /// The fiber the actor lives on.
    pub fn fiber(&self) -> &Rc<Fiber<C>> {
        &self.fiber
    }

    /// Payload codec of the fiber.
    pub fn codec(&self) -> &C {
        self.fiber.codec()
    }

    /// Send a one-way message from this actor.
    pub fn send<M: Message>(&self, to: Address, message: &M) -> Result<(), MessagingError> {
        self.fiber.send_from(self.address, to, message)
    }

    /// Call another entity from this actor, with the fiber's call timeout.
    ///
    /// Calling the actor itself would wait on its own turn until timeout.
    pub async fn call<M: Message>(
        &self,
        to: Address,
        message: &M,
    ) -> Result<M::Response, MessagingError> {
        self.fiber
            .call_from(self.address, to, message, self.fiber.config().call_timeout())
            .await
    }

    /// Spawn a new actor on the same fiber.
    pub fn spawn<A: Actor>(&self, actor: A) -> Result<Address, FiberError> {
        self.fiber.spawn(actor)
    }

    /// Relocate this actor to the fiber rooted at `destination` once the
    /// current turn has finished.
    ///
    /// Uses the fiber's location client; the outcome is logged.
    pub fn transfer_after_turn(&self, destination: Address) -> Result<(), FiberError> {
        let location = self
            .fiber
            .location()
            .ok_or(FiberError::NoLocation(self.fiber.id()))?;
        let coordinator = TransferCoordinator::new(self.fiber.clone(), location);
        let address = self.address;
        tokio::task::spawn_local(async move {
            match coordinator.transfer(address, destination).await {
                Ok(new) => tracing::debug!(%address, %new, "actor transferred"),
                Err(error) => tracing::warn!(%address, %destination, %error, "actor transfer failed"),
            }
        });
        Ok(())
    }
}
