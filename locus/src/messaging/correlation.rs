//! Request/response correlation.
//!
//! [`PendingCalls`] hands out rpc ids and keeps one oneshot sender per
//! outstanding call. Whoever settles a call first (a reply, the deadline, a
//! cancellation, a send failure) removes it from the table; anything that
//! arrives afterwards finds nothing and is dropped.
//!
//! ```text
//! register() ──▶ calls[rpc] = tx ──▶ caller awaits rx
//! reply(rpc) ──▶ calls.remove(rpc) ──▶ tx.send(reply)
//! timeout    ──▶ calls.remove(rpc)      (late reply: unknown rpc, dropped)
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::address::Address;
use crate::messaging::{Direction, Envelope};

/// Outcome of a call as seen by the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// Handler succeeded; codec-encoded response body.
    Response(Vec<u8>),
    /// Handler failed with a reason.
    Fault(String),
    /// No live entity at the destination.
    Redirect,
}

struct PendingCall {
    target: Address,
    kind: u16,
    started_at: Instant,
    sender: oneshot::Sender<Reply>,
}

/// Table of calls awaiting a reply, owned by one fiber's router.
pub struct PendingCalls {
    next_id: Cell<i32>,
    calls: RefCell<HashMap<i32, PendingCall>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn starting_at(first: i32) -> Self {
        Self {
            next_id: Cell::new(first),
            calls: RefCell::new(HashMap::new()),
        }
    }

    /// Allocate an rpc id for a call to `target` and start tracking it.
    ///
    /// Ids wrap around, never use `0` and never collide with a call still
    /// in flight.
    pub(crate) fn register(&self, target: Address, kind: u16) -> (i32, oneshot::Receiver<Reply>) {
        let mut calls = self.calls.borrow_mut();
        let rpc_id = loop {
            let id = self.next_id.get();
            self.next_id
                .set(if id == i32::MAX { 1 } else { id.wrapping_add(1) });
            if id > 0 && !calls.contains_key(&id) {
                break id;
            }
        };

        let (sender, receiver) = oneshot::channel();
        calls.insert(
            rpc_id,
            PendingCall {
                target,
                kind,
                started_at: Instant::now(),
                sender,
            },
        );
        (rpc_id, receiver)
    }

    /// Settle the call a reply envelope answers.
    ///
    /// Returns `false` when the rpc id is unknown (late, duplicate or
    /// never issued); the reply is dropped.
    pub(crate) fn complete(&self, envelope: Envelope) -> bool {
        let reply = match envelope.direction {
            Direction::Response => Reply::Response(envelope.payload),
            Direction::Fault => {
                Reply::Fault(String::from_utf8_lossy(&envelope.payload).into_owned())
            }
            Direction::Redirect => Reply::Redirect,
            Direction::OneWay | Direction::Request => {
                tracing::warn!(rpc_id = envelope.rpc_id, "non-reply envelope offered to pending calls");
                return false;
            }
        };

        let Some(call) = self.calls.borrow_mut().remove(&envelope.rpc_id) else {
            tracing::debug!(
                rpc_id = envelope.rpc_id,
                from = %envelope.from,
                "dropping reply for unknown rpc id"
            );
            return false;
        };

        tracing::trace!(
            rpc_id = envelope.rpc_id,
            target = %call.target,
            kind = call.kind,
            elapsed = ?call.started_at.elapsed(),
            "call settled"
        );
        // The caller may have gone away; nothing to do then.
        let _ = call.sender.send(reply);
        true
    }

    /// Stop tracking a call. Returns whether it was still pending.
    pub(crate) fn remove(&self, rpc_id: i32) -> bool {
        self.calls.borrow_mut().remove(&rpc_id).is_some()
    }

    /// Fail every pending call; their callers observe a closed router.
    pub(crate) fn close_all(&self) {
        let drained: Vec<_> = self.calls.borrow_mut().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "abandoning pending calls");
        }
    }

    /// Number of calls awaiting a reply.
    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Whether no call is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
