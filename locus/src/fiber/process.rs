//! Process-wide routing between fibers.
//!
//! A [`Process`] is the only structure shared across threads: it maps fiber
//! ids to their inbound channels and owns the [`Transport`] to other
//! processes. Everything a fiber owns stays on that fiber; the process only
//! moves envelopes and scheduled tasks into fiber inboxes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;

use crate::address::{FiberId, ProcessId};
use crate::error::{FiberError, TransportError};
use crate::messaging::{Direction, Envelope, Transport};

/// Work delivered to a fiber's pump.
pub enum Inbound {
    /// An envelope addressed to the fiber or one of its entities.
    Envelope(Envelope),
    /// A closure to run on the fiber.
    Task(Box<dyn FnOnce() + Send>),
}

/// Receiving half of a fiber's inbox.
pub type FiberInbox = mpsc::UnboundedReceiver<Inbound>;

struct ProcessInner {
    id: ProcessId,
    fibers: RwLock<HashMap<FiberId, mpsc::UnboundedSender<Inbound>>>,
    transport: Arc<dyn Transport>,
}

/// Handle to the local process. Cheap to clone and `Send + Sync`.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

/// Non-owning [`Process`] handle.
#[derive(Clone)]
pub struct WeakProcess {
    inner: Weak<ProcessInner>,
}

impl WeakProcess {
    /// Recover the process if it is still alive.
    pub fn upgrade(&self) -> Option<Process> {
        self.inner.upgrade().map(|inner| Process { inner })
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.inner.id)
            .field("fibers", &self.fiber_count())
            .finish()
    }
}

impl Process {
    /// Create a process reaching its peers through `transport`.
    pub fn new(id: ProcessId, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ProcessInner {
                id,
                fibers: RwLock::new(HashMap::new()),
                transport,
            }),
        }
    }

    /// This process's id.
    pub fn id(&self) -> ProcessId {
        self.inner.id
    }

    /// Non-owning handle, for transports that must not keep the process alive.
    pub fn downgrade(&self) -> WeakProcess {
        WeakProcess {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a fiber and return its inbox.
    pub fn create_fiber(&self, fiber: FiberId) -> Result<FiberInbox, FiberError> {
        let mut fibers = self
            .inner
            .fibers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if fibers.contains_key(&fiber) {
            return Err(FiberError::AlreadyExists(fiber));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        fibers.insert(fiber, tx);
        tracing::debug!(process = ?self.inner.id, ?fiber, "fiber created");
        Ok(rx)
    }

    /// Unregister a fiber. Its inbox closes once drained.
    pub fn destroy_fiber(&self, fiber: FiberId) -> bool {
        let removed = self
            .inner
            .fibers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fiber)
            .is_some();
        if removed {
            tracing::debug!(process = ?self.inner.id, ?fiber, "fiber destroyed");
        }
        removed
    }

    /// Whether a fiber with this id runs here.
    pub fn has_fiber(&self, fiber: FiberId) -> bool {
        self.inner
            .fibers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&fiber)
    }

    /// Number of registered fibers.
    pub fn fiber_count(&self) -> usize {
        self.inner
            .fibers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Route an envelope to its destination fiber, here or remote.
    pub fn post(&self, envelope: Envelope) -> Result<(), TransportError> {
        let destination = envelope.to.process();
        if destination == self.inner.id {
            self.deliver_local(envelope);
            return Ok(());
        }

        let frame = envelope.to_frame()?;
        self.inner.transport.send(destination, frame)
    }

    /// Run `task` on the given fiber's thread.
    pub fn schedule(
        &self,
        fiber: FiberId,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), FiberError> {
        let fibers = self
            .inner
            .fibers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        fibers
            .get(&fiber)
            .and_then(|tx| tx.send(Inbound::Task(Box::new(task))).ok())
            .ok_or(FiberError::ShutDown(fiber))
    }

    /// Inbound callback for the transport: parse and deliver one frame.
    pub fn on_receive(&self, frame: &[u8]) {
        match Envelope::from_frame(frame) {
            Ok(envelope) if envelope.to.process() == self.inner.id => {
                self.deliver_local(envelope)
            }
            Ok(envelope) => {
                tracing::warn!(process = ?self.inner.id, to = %envelope.to, "dropping frame for another process");
            }
            Err(error) => {
                tracing::warn!(process = ?self.inner.id, %error, "dropping malformed frame");
            }
        }
    }

    fn deliver_local(&self, envelope: Envelope) {
        let undelivered = {
            let fibers = self
                .inner
                .fibers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match fibers.get(&envelope.to.fiber()) {
                Some(tx) => match tx.send(Inbound::Envelope(envelope)) {
                    Ok(()) => None,
                    Err(mpsc::error::SendError(Inbound::Envelope(envelope))) => Some(envelope),
                    Err(_) => None,
                },
                None => Some(envelope),
            }
        };

        // No such fiber: the addressee cannot be alive.
        if let Some(envelope) = undelivered {
            if envelope.direction == Direction::Request {
                tracing::debug!(to = %envelope.to, "no such fiber, redirecting");
                if let Err(error) = self.post(envelope.redirect()) {
                    tracing::warn!(to = %envelope.from, %error, "failed to deliver redirect");
                }
            } else {
                tracing::debug!(to = %envelope.to, direction = ?envelope.direction, "no such fiber, dropping");
            }
        }
    }
}
