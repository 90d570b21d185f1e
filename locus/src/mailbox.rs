//! Per-entity ordered inbound queue.
//!
//! A [`Mailbox`] owns the envelopes addressed to one entity and runs them
//! one *turn* at a time, in enqueue order, no matter how long a turn stays
//! suspended.
//!
//! # Design
//!
//! ```text
//! enqueue(m) ──▶ queue.push_back(m) ── running? ── no ──▶ spawn drain loop
//!
//! drain loop:
//!   while let Some(m) = queue.pop_front() (and mailbox open)
//!       spawn_local(handler.run_turn(m)).await   // panic stops here
//!   running = false, notify idle waiters
//! ```
//!
//! Each turn runs as its own local task so a panic is caught at the turn
//! boundary as a `JoinError`, logged, and the next envelope still runs.
//!
//! The queue is unbounded and [`enqueue`](Mailbox::enqueue) never blocks.
//! [`detach`](Mailbox::detach) closes the mailbox and hands back what is
//! queued, so the owner can redirect requests instead of leaving their
//! callers to time out.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::address::Address;
use crate::error::{HandlerError, MailboxError};
use crate::messaging::Envelope;

/// Runs one turn for one envelope.
#[async_trait::async_trait(?Send)]
pub trait TurnHandler {
    /// Handle a single envelope. Errors are logged by the mailbox.
    async fn run_turn(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Lifecycle of a [`Mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    /// Accepting envelopes.
    Open,
    /// Closed for a relocation; may be reopened by a rollback.
    Detached,
    /// Closed for good.
    Disposed,
}

struct Queue {
    envelopes: VecDeque<Envelope>,
    running: bool,
    state: MailboxState,
}

struct Inner {
    owner: Address,
    handler: Rc<dyn TurnHandler>,
    queue: RefCell<Queue>,
    idle: Notify,
}

/// Ordered inbound queue of one entity.
#[derive(Clone)]
pub struct Mailbox {
    inner: Rc<Inner>,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.borrow();
        f.debug_struct("Mailbox")
            .field("owner", &self.inner.owner)
            .field("queued", &queue.envelopes.len())
            .field("running", &queue.running)
            .field("state", &queue.state)
            .finish()
    }
}

impl Mailbox {
    /// Create an open mailbox for `owner`, dispatching turns to `handler`.
    pub fn new(owner: Address, handler: Rc<dyn TurnHandler>) -> Self {
        Self {
            inner: Rc::new(Inner {
                owner,
                handler,
                queue: RefCell::new(Queue {
                    envelopes: VecDeque::new(),
                    running: false,
                    state: MailboxState::Open,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Address of the entity owning the mailbox.
    pub fn owner(&self) -> Address {
        self.inner.owner
    }

    /// Append an envelope, starting a turn if none is running.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let mut queue = self.inner.queue.borrow_mut();
        if queue.state != MailboxState::Open {
            return Err(MailboxError::Disposed);
        }

        queue.envelopes.push_back(envelope);
        if !queue.running {
            queue.running = true;
            tokio::task::spawn_local(drain(self.inner.clone()));
        }
        Ok(())
    }

    /// Close the mailbox and return anything still queued.
    ///
    /// A turn already running finishes; see [`idle`](Self::idle).
    pub fn detach(&self) -> Vec<Envelope> {
        self.close(MailboxState::Detached)
    }

    /// Reopen a detached mailbox. Has no effect once disposed.
    pub fn reattach(&self) -> Result<(), MailboxError> {
        let mut queue = self.inner.queue.borrow_mut();
        match queue.state {
            MailboxState::Disposed => Err(MailboxError::Disposed),
            _ => {
                queue.state = MailboxState::Open;
                Ok(())
            }
        }
    }

    /// Close the mailbox for good, returning anything still queued.
    pub fn dispose(&self) -> Vec<Envelope> {
        self.close(MailboxState::Disposed)
    }

    /// Resolve once no turn is running.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.inner.queue.borrow().running {
                return;
            }
            notified.await;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MailboxState {
        self.inner.queue.borrow().state
    }

    /// Whether envelopes are accepted.
    pub fn is_open(&self) -> bool {
        self.state() == MailboxState::Open
    }

    /// Whether a turn is in progress or scheduled.
    pub fn is_running(&self) -> bool {
        self.inner.queue.borrow().running
    }

    /// Envelopes waiting for a turn.
    pub fn len(&self) -> usize {
        self.inner.queue.borrow().envelopes.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self, state: MailboxState) -> Vec<Envelope> {
        let mut queue = self.inner.queue.borrow_mut();
        if queue.state == MailboxState::Disposed {
            return Vec::new();
        }
        queue.state = state;
        let pending: Vec<Envelope> = queue.envelopes.drain(..).collect();
        if !pending.is_empty() {
            tracing::debug!(owner = %self.inner.owner, pending = pending.len(), ?state, "mailbox closed with queued envelopes");
        }
        pending
    }
}

async fn drain(inner: Rc<Inner>) {
    loop {
        let envelope = {
            let mut queue = inner.queue.borrow_mut();
            let next = match queue.state {
                MailboxState::Open => queue.envelopes.pop_front(),
                _ => None,
            };
            match next {
                Some(envelope) => envelope,
                None => {
                    queue.running = false;
                    drop(queue);
                    inner.idle.notify_waiters();
                    return;
                }
            }
        };

        let kind = envelope.kind;
        let handler = inner.handler.clone();
        let turn = tokio::task::spawn_local(async move { handler.run_turn(envelope).await });

        match turn.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(owner = %inner.owner, kind, %error, "turn failed");
            }
            Err(join) => {
                tracing::error!(owner = %inner.owner, kind, error = %join, "turn panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{EntityId, FiberId, ProcessId};
    use std::time::Duration;
    use tokio::task::{yield_now, LocalSet};

    struct Recorder {
        started: RefCell<Vec<u16>>,
        finished: RefCell<Vec<u16>>,
    }

    #[async_trait::async_trait(?Send)]
    impl TurnHandler for Recorder {
        async fn run_turn(&self, envelope: Envelope) -> Result<(), HandlerError> {
            self.started.borrow_mut().push(envelope.kind);
            match envelope.kind {
                // first message suspends for a long time
                1 => tokio::time::sleep(Duration::from_secs(5)).await,
                13 => panic!("boom"),
                14 => return Err(HandlerError::Failed("rejected".to_string())),
                _ => yield_now().await,
            }
            self.finished.borrow_mut().push(envelope.kind);
            Ok(())
        }
    }

    fn owner() -> Address {
        Address::encode(ProcessId(1), FiberId(1), EntityId(1)).expect("encode")
    }

    fn envelope(kind: u16) -> Envelope {
        Envelope::one_way(Address::ZERO, owner(), kind, Vec::new())
    }

    fn recorder() -> Rc<Recorder> {
        Rc::new(Recorder {
            started: RefCell::new(Vec::new()),
            finished: RefCell::new(Vec::new()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_turns_start_in_enqueue_order() {
        LocalSet::new()
            .run_until(async {
                let handler = recorder();
                let mailbox = Mailbox::new(owner(), handler.clone());

                for kind in [1, 2, 3] {
                    mailbox.enqueue(envelope(kind)).expect("open mailbox");
                }

                yield_now().await;
                // m1 is suspended; m2 and m3 must not have started
                assert_eq!(*handler.started.borrow(), vec![1]);

                mailbox.idle().await;
                assert_eq!(*handler.started.borrow(), vec![1, 2, 3]);
                assert_eq!(*handler.finished.borrow(), vec![1, 2, 3]);
                assert!(!mailbox.is_running());
            })
            .await;
    }

    #[tokio::test]
    async fn test_faulty_turns_do_not_stop_the_queue() {
        LocalSet::new()
            .run_until(async {
                let handler = recorder();
                let mailbox = Mailbox::new(owner(), handler.clone());

                for kind in [13, 14, 15] {
                    mailbox.enqueue(envelope(kind)).expect("open mailbox");
                }
                mailbox.idle().await;

                assert_eq!(*handler.started.borrow(), vec![13, 14, 15]);
                assert_eq!(*handler.finished.borrow(), vec![15]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_hands_back_queue_and_rejects() {
        LocalSet::new()
            .run_until(async {
                let handler = recorder();
                let mailbox = Mailbox::new(owner(), handler.clone());

                mailbox.enqueue(envelope(1)).expect("open mailbox");
                mailbox.enqueue(envelope(2)).expect("open mailbox");
                yield_now().await;

                let pending = mailbox.detach();
                assert_eq!(pending.iter().map(|e| e.kind).collect::<Vec<_>>(), vec![2]);
                assert_eq!(mailbox.state(), MailboxState::Detached);
                assert!(mailbox.is_empty());
                assert_eq!(mailbox.enqueue(envelope(3)), Err(MailboxError::Disposed));

                // the running turn completes, the returned one never starts
                mailbox.idle().await;
                assert_eq!(*handler.started.borrow(), vec![1]);
                assert_eq!(*handler.finished.borrow(), vec![1]);

                mailbox.reattach().expect("detached mailbox reopens");
                mailbox.enqueue(envelope(4)).expect("reopened");
                mailbox.idle().await;
                assert_eq!(*handler.started.borrow(), vec![1, 4]);

                assert!(mailbox.dispose().is_empty());
                assert_eq!(mailbox.reattach(), Err(MailboxError::Disposed));
                assert_eq!(mailbox.enqueue(envelope(5)), Err(MailboxError::Disposed));
            })
            .await;
    }
}
