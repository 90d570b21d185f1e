//! Moving a located actor to another fiber.
//!
//! A transfer freezes the actor, locks its location key, ships a snapshot to
//! the destination and then either installs the new address or puts
//! everything back:
//!
//! ```text
//! detach ─▶ snapshot ─▶ lock(k, old) ─▶ TRANSFER_IN ─┬─ ok ──▶ unlock(k, old, new) ─▶ dispose
//!                                                    └─ err ─▶ unlock(k, old, old) ─▶ reattach
//! ```
//!
//! While the key is locked, senders resolving it still get the old address
//! and are redirected until the unlock lands; see
//! [`LocationSender`](crate::messaging::LocationSender).

use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::address::Address;
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::TransferError;
use crate::fiber::Fiber;
use crate::location::LocationClient;
use crate::mailbox::Mailbox;
use crate::messaging::kinds;

/// Runs transfers out of one fiber.
pub struct TransferCoordinator<C: MessageCodec = JsonCodec> {
    fiber: Rc<Fiber<C>>,
    location: Rc<dyn LocationClient>,
    deadline: Duration,
}

impl<C: MessageCodec> TransferCoordinator<C> {
    /// Coordinator using the fiber's lock timeout as the transfer deadline.
    pub fn new(fiber: Rc<Fiber<C>>, location: Rc<dyn LocationClient>) -> Self {
        let deadline = fiber.config().lock_timeout();
        Self {
            fiber,
            location,
            deadline,
        }
    }

    /// Override the deadline for the lock and the destination call.
    ///
    /// The host starts the lock's hold timer on acquisition, so the
    /// destination call gets what is left of the deadline after locking,
    /// minus headroom for the unlock to reach the host.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Move the actor at `address` to the fiber rooted at `destination`.
    ///
    /// Returns the actor's new address. On [`TransferError::RolledBack`] the
    /// actor is live again at `address` and its key still points there.
    pub async fn transfer(
        &self,
        address: Address,
        destination: Address,
    ) -> Result<Address, TransferError> {
        let (actor, mailbox) = self
            .fiber
            .actor(address)
            .ok_or(TransferError::NotFound(address))?;

        for envelope in mailbox.detach() {
            self.fiber.router().bounce(&envelope);
        }
        mailbox.idle().await;

        let Some((location_type, id)) = actor.location() else {
            restore_mailbox(&mailbox);
            return Err(TransferError::NotLocated(address));
        };

        let payload = match actor
            .snapshot(self.fiber.codec())
            .and_then(|snapshot| Ok(self.fiber.codec().encode(&snapshot)?))
        {
            Ok(payload) => payload,
            Err(error) => {
                restore_mailbox(&mailbox);
                return Err(error);
            }
        };

        let started = Instant::now();
        if let Err(error) = self
            .location
            .lock(location_type, id, address, self.deadline)
            .await
        {
            restore_mailbox(&mailbox);
            return Err(error.into());
        }
        tracing::debug!(?location_type, id, %address, %destination, "location locked for transfer");

        let accepted = self
            .fiber
            .router()
            .call(
                self.fiber.address(),
                destination.fiber_root(),
                kinds::TRANSFER_IN,
                payload,
                call_budget(self.deadline, started.elapsed()),
            )
            .await
            .and_then(|body| Ok(self.fiber.codec().decode::<Address>(&body)?));

        match accepted {
            Ok(new) => {
                if let Err(source) = self.location.unlock(location_type, id, address, new).await {
                    tracing::error!(?location_type, id, %address, %new, %source, "transfer committed but location unlock failed");
                    self.fiber.despawn(address);
                    return Err(TransferError::Fatal { address, source });
                }
                self.fiber.despawn(address);
                tracing::info!(?location_type, id, from = %address, to = %new, "actor transferred");
                Ok(new)
            }
            Err(source) => {
                tracing::warn!(?location_type, id, %address, %destination, error = %source, "transfer rejected, rolling back");
                if let Err(unlock) = self
                    .location
                    .unlock(location_type, id, address, address)
                    .await
                {
                    tracing::error!(?location_type, id, %address, error = %unlock, "rollback unlock failed");
                    restore_mailbox(&mailbox);
                    return Err(TransferError::Fatal {
                        address,
                        source: unlock,
                    });
                }
                restore_mailbox(&mailbox);
                Err(TransferError::RolledBack { address, source })
            }
        }
    }
}

/// Share of the deadline kept back for the closing unlock.
const UNLOCK_HEADROOM_DIVISOR: u32 = 5;

fn call_budget(deadline: Duration, elapsed: Duration) -> Duration {
    deadline
        .saturating_sub(elapsed)
        .saturating_sub(deadline / UNLOCK_HEADROOM_DIVISOR)
}

fn restore_mailbox(mailbox: &Mailbox) {
    if let Err(error) = mailbox.reattach() {
        tracing::warn!(owner = %mailbox.owner(), %error, "mailbox could not be reopened");
    }
}
