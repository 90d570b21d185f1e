//! Process-level byte transport.
//!
//! A [`Transport`] moves framed envelopes between processes. The contract is
//! small: frames sent to one destination process arrive in send order, and
//! the receiving side feeds them to [`Process::on_receive`].
//!
//! [`LocalNetwork`] wires several [`Process`]es living in one OS process
//! together, which is what tests and single-binary deployments use. It can
//! cut a process off to exercise failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::address::ProcessId;
use crate::error::TransportError;
use crate::fiber::{Process, WeakProcess};

/// Delivers frames to other processes.
pub trait Transport: Send + Sync {
    /// Hand `frame` to process `to`. Must preserve per-destination order.
    fn send(&self, to: ProcessId, frame: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Default)]
struct NetworkState {
    processes: HashMap<ProcessId, WeakProcess>,
    disconnected: HashSet<ProcessId>,
}

/// In-memory [`Transport`] between processes sharing an address space.
///
/// # Example
///
/// ```rust,ignore
/// let network = LocalNetwork::new();
/// let a = Process::new(ProcessId(1), network.clone());
/// let b = Process::new(ProcessId(2), network.clone());
/// network.attach(&a);
/// network.attach(&b);
/// ```
#[derive(Default)]
pub struct LocalNetwork {
    state: Mutex<NetworkState>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `process` reachable.
    pub fn attach(&self, process: &Process) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processes.insert(process.id(), process.downgrade());
        state.disconnected.remove(&process.id());
    }

    /// Drop every frame addressed to `process` until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, process: ProcessId) {
        tracing::debug!(?process, "disconnecting process");
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disconnected
            .insert(process);
    }

    /// Undo [`disconnect`](Self::disconnect).
    pub fn reconnect(&self, process: ProcessId) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disconnected
            .remove(&process);
    }
}

impl Transport for LocalNetwork {
    fn send(&self, to: ProcessId, frame: Vec<u8>) -> Result<(), TransportError> {
        let target = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.disconnected.contains(&to) {
                return Err(TransportError::Disconnected(to));
            }
            state
                .processes
                .get(&to)
                .and_then(WeakProcess::upgrade)
                .ok_or(TransportError::UnknownProcess(to))?
        };

        target.on_receive(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, EntityId, FiberId};
    use crate::messaging::Envelope;
    use crate::fiber::Inbound;

    fn addr(p: u32, f: u32, e: u32) -> Address {
        Address::encode(ProcessId(p), FiberId(f), EntityId(e)).expect("encode")
    }

    #[test]
    fn test_frames_reach_remote_fiber_in_order() {
        let network = LocalNetwork::new();
        let a = Process::new(ProcessId(1), network.clone());
        let b = Process::new(ProcessId(2), network.clone());
        network.attach(&a);
        network.attach(&b);

        let mut inbox = b.create_fiber(FiberId(0)).expect("new fiber");
        for kind in 1..=3 {
            a.post(Envelope::one_way(addr(1, 0, 0), addr(2, 0, 5), kind, Vec::new()))
                .expect("post");
        }

        for kind in 1..=3 {
            match inbox.try_recv().expect("delivered") {
                Inbound::Envelope(envelope) => assert_eq!(envelope.kind, kind),
                Inbound::Task(_) => panic!("unexpected task"),
            }
        }
    }

    #[test]
    fn test_disconnect_and_unknown_process() {
        let network = LocalNetwork::new();
        let a = Process::new(ProcessId(1), network.clone());
        let b = Process::new(ProcessId(2), network.clone());
        network.attach(&a);
        network.attach(&b);

        network.disconnect(ProcessId(2));
        let err = a
            .post(Envelope::one_way(addr(1, 0, 0), addr(2, 0, 1), 1, Vec::new()))
            .expect_err("disconnected");
        assert_eq!(err, TransportError::Disconnected(ProcessId(2)));

        network.reconnect(ProcessId(2));
        a.post(Envelope::one_way(addr(1, 0, 0), addr(2, 0, 1), 1, Vec::new()))
            .expect("reconnected");

        let err = a
            .post(Envelope::one_way(addr(1, 0, 0), addr(3, 0, 1), 1, Vec::new()))
            .expect_err("unknown process");
        assert_eq!(err, TransportError::UnknownProcess(ProcessId(3)));
    }
}
