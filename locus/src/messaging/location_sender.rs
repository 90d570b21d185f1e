//! Messages addressed by logical id rather than by address.

use std::rc::Rc;
use std::time::Duration;

use crate::actor::Message;
use crate::codec::MessageCodec;
use crate::error::{LocationSendError, MessagingError};
use crate::fiber::Fiber;
use crate::location::{LocationClient, LocationType};
use crate::sync::LockType;

/// Sends to whatever address `(location_type, id)` currently resolves to.
///
/// A redirect from a stale address means the entity moved or is moving: the
/// sender waits `interval`, resolves again and retries, up to `attempts`
/// resolutions. Messages from one fiber to one logical id go out one at a
/// time, in the order they were issued.
pub struct LocationSender<C: MessageCodec> {
    fiber: Rc<Fiber<C>>,
    location: Rc<dyn LocationClient>,
    attempts: u32,
    interval: Duration,
}

impl<C: MessageCodec> LocationSender<C> {
    /// Sender on `fiber` resolving through `location`, with the fiber's
    /// retry settings.
    pub fn new(fiber: Rc<Fiber<C>>, location: Rc<dyn LocationClient>) -> Self {
        let attempts = fiber.config().location_retry_attempts();
        let interval = fiber.config().location_retry_interval();
        Self {
            fiber,
            location,
            attempts,
            interval,
        }
    }

    /// Override the retry budget.
    pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.interval = interval;
        self
    }

    /// Call the entity and decode its reply.
    pub async fn call<M: Message>(
        &self,
        location_type: LocationType,
        id: u64,
        message: &M,
    ) -> Result<M::Response, LocationSendError> {
        let payload = self
            .fiber
            .codec()
            .encode(message)
            .map_err(MessagingError::from)?;
        let body = self.deliver(location_type, id, M::KIND, payload).await?;
        let response = self
            .fiber
            .codec()
            .decode(&body)
            .map_err(MessagingError::from)?;
        Ok(response)
    }

    /// Deliver a message to the entity, ignoring its reply body.
    ///
    /// Delivery is confirmed, so a moving entity is retried exactly as for
    /// [`call`](Self::call).
    pub async fn send<M: Message>(
        &self,
        location_type: LocationType,
        id: u64,
        message: &M,
    ) -> Result<(), LocationSendError> {
        let payload = self
            .fiber
            .codec()
            .encode(message)
            .map_err(MessagingError::from)?;
        self.deliver(location_type, id, M::KIND, payload).await?;
        Ok(())
    }

    async fn deliver(
        &self,
        location_type: LocationType,
        id: u64,
        kind: u16,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, LocationSendError> {
        let _ticket = self
            .fiber
            .mutex()
            .acquire(
                LockType::LocationSender(location_type),
                id,
                0,
                Some(self.fiber.config().lock_timeout()),
            )
            .await?;

        for attempt in 1..=self.attempts {
            let address = self.location.get(location_type, id).await?;
            if !address.is_zero() {
                let outcome = self
                    .fiber
                    .router()
                    .call(
                        self.fiber.address(),
                        address,
                        kind,
                        payload.clone(),
                        self.fiber.config().call_timeout(),
                    )
                    .await;
                match outcome {
                    Err(MessagingError::Redirect { .. }) => {
                        tracing::debug!(?location_type, id, %address, attempt, "entity moved, retrying");
                    }
                    other => return Ok(other?),
                }
            } else {
                tracing::debug!(?location_type, id, attempt, "entity not registered, retrying");
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        tracing::warn!(?location_type, id, attempts = self.attempts, "entity unreachable");
        Err(LocationSendError::Unreachable {
            location_type,
            id,
            attempts: self.attempts,
        })
    }
}
