//! One-way sends and correlated calls between addresses.
//!
//! Every fiber owns one [`MessageRouter`]. Outbound envelopes are handed to
//! the [`Process`], which delivers them to a local fiber's inbox or frames
//! them for the [`Transport`](super::Transport). Replies come back through
//! the fiber's pump and settle the matching [`PendingCalls`] entry.
//!
//! The router never retries. A [`MessagingError::Redirect`] tells the caller
//! that the entity moved or died; re-resolving is up to the caller (see
//! [`LocationSender`](super::LocationSender)).

use std::time::Duration;

use crate::address::Address;
use crate::error::{HandlerError, MessagingError};
use crate::fiber::Process;
use crate::sync::CancellationToken;

use super::correlation::{PendingCalls, Reply};
use super::{Direction, Envelope};

/// Per-fiber send/call front end.
pub struct MessageRouter {
    process: Process,
    pending: PendingCalls,
}

impl MessageRouter {
    /// Create a router posting through `process`.
    pub fn new(process: Process) -> Self {
        Self {
            process,
            pending: PendingCalls::new(),
        }
    }

    /// Send a one-way message.
    pub fn send(
        &self,
        from: Address,
        to: Address,
        kind: u16,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        self.process
            .post(Envelope::one_way(from, to, kind, payload))?;
        Ok(())
    }

    /// Send a request and wait for its reply, at most `deadline`.
    ///
    /// Returns the codec-encoded response body.
    pub async fn call(
        &self,
        from: Address,
        to: Address,
        kind: u16,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<Vec<u8>, MessagingError> {
        self.call_inner(from, to, kind, payload, deadline, None)
            .await
    }

    /// Like [`call`](Self::call), also giving up when `cancel` fires.
    pub async fn call_with_cancel(
        &self,
        from: Address,
        to: Address,
        kind: u16,
        payload: Vec<u8>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MessagingError> {
        self.call_inner(from, to, kind, payload, deadline, Some(cancel))
            .await
    }

    async fn call_inner(
        &self,
        from: Address,
        to: Address,
        kind: u16,
        payload: Vec<u8>,
        deadline: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, MessagingError> {
        let (rpc_id, reply) = self.pending.register(to, kind);
        let slot = PendingSlot {
            pending: &self.pending,
            rpc_id,
        };

        self.process
            .post(Envelope::request(from, to, rpc_id, kind, payload))?;

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            reply = reply => reply,
            _ = tokio::time::sleep(deadline) => {
                tracing::debug!(%to, rpc_id, kind, ?deadline, "call timed out");
                return Err(MessagingError::Timeout { to, rpc_id, after: deadline });
            }
            _ = cancelled => {
                tracing::debug!(%to, rpc_id, kind, "call cancelled");
                return Err(MessagingError::Cancelled { to, rpc_id });
            }
        };
        drop(slot);

        match outcome {
            Ok(Reply::Response(body)) => Ok(body),
            Ok(Reply::Fault(reason)) => Err(MessagingError::Handler { to, kind, reason }),
            Ok(Reply::Redirect) => Err(MessagingError::Redirect { to }),
            Err(_) => Err(MessagingError::Closed),
        }
    }

    /// Answer `request` with the outcome of its handler.
    ///
    /// One-way envelopes get no answer.
    pub fn reply(&self, request: &Envelope, outcome: &Result<Vec<u8>, HandlerError>) {
        if request.direction != Direction::Request {
            return;
        }

        let envelope = match outcome {
            Ok(body) => request.response(body.clone()),
            Err(error) => request.fault(&error.to_string()),
        };
        if let Err(error) = self.process.post(envelope) {
            tracing::warn!(to = %request.from, rpc_id = request.rpc_id, %error, "failed to deliver reply");
        }
    }

    /// Answer `request` with a redirect; drop it if it is one-way.
    pub fn bounce(&self, request: &Envelope) {
        match request.direction {
            Direction::Request => {
                tracing::debug!(to = %request.to, from = %request.from, rpc_id = request.rpc_id, "no live entity, redirecting");
                if let Err(error) = self.process.post(request.redirect()) {
                    tracing::warn!(to = %request.from, %error, "failed to deliver redirect");
                }
            }
            _ => {
                tracing::debug!(to = %request.to, kind = request.kind, "dropping one-way message to dead address");
            }
        }
    }

    /// Settle the pending call a reply envelope answers.
    pub(crate) fn complete(&self, envelope: Envelope) -> bool {
        self.pending.complete(envelope)
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every pending call with [`MessagingError::Closed`].
    pub(crate) fn close(&self) {
        self.pending.close_all();
    }
}

/// Frees the pending entry however the call ends, including when the
/// future is dropped.
struct PendingSlot<'a> {
    pending: &'a PendingCalls,
    rpc_id: i32,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.rpc_id);
    }
}
