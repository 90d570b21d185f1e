//! Per-key asynchronous mutual exclusion.
//!
//! [`AsyncMutex`] serializes critical sections that span suspension points
//! (network round trips, timers) on a single fiber. Sections are identified
//! by a `(LockType, u64)` pair; unrelated keys never contend.
//!
//! # Design
//!
//! ```text
//! acquire(K) ── free? ──────────────────────────▶ Ticket(level 0)
//!     │
//!     └── held ──▶ waiters[K].push_back(tx) ── rx ──▶ Ticket(level 0)
//!                                              ▲
//! drop(Ticket) ── pop_front ── tx.send(()) ────┘   (or clear K when empty)
//! ```
//!
//! - Grants are FIFO per key and at most one outer [`Ticket`] is active.
//! - A holder may re-enter with `level == depth` (1, 2, ...) and is granted
//!   immediately; such a nested ticket only pops one level when dropped.
//!   Any other `level > 0` queues like a fresh caller. Levels above the
//!   configured bound fail with [`LockError::LevelOverflow`].
//! - A deadline or [`CancellationToken`] removes the waiter from the queue.
//!   If the promotion already happened when the deadline fires, the grant
//!   wins and the ticket is returned.
//! - Dropping a pending acquire future behaves like cancellation.
//!
//! # Example
//!
//! ```rust,ignore
//! let mutex = AsyncMutex::new(100);
//! let ticket = mutex
//!     .acquire(LockType::Location(LocationType::Unit), 42, 0, Some(Duration::from_secs(1)))
//!     .await?;
//! // ... suspend freely, the key stays owned ...
//! drop(ticket); // promotes the next waiter
//! ```

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::DEFAULT_MAX_LOCK_LEVEL;
use crate::error::LockError;
use crate::location::LocationType;

use super::CancellationToken;

/// Namespace of an [`AsyncMutex`] key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Location table updates for one namespace.
    Location(LocationType),
    /// Per-target ordering of location-addressed sends.
    LocationSender(LocationType),
    /// Application-defined sections.
    Custom(u16),
}

type Key = (LockType, u64);

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

struct KeyState {
    depth: u32,
    waiters: VecDeque<Waiter>,
}

struct State {
    keys: HashMap<Key, KeyState>,
    next_waiter: u64,
    max_level: u32,
}

/// Queued per-key asynchronous lock.
///
/// Cloning yields another handle to the same lock table.
#[derive(Clone)]
pub struct AsyncMutex {
    inner: Rc<RefCell<State>>,
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOCK_LEVEL)
    }
}

impl fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("AsyncMutex")
            .field("held_keys", &state.keys.len())
            .field("max_level", &state.max_level)
            .finish()
    }
}

impl AsyncMutex {
    /// Create an empty lock table bounding re-entrancy at `max_level`.
    pub fn new(max_level: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(State {
                keys: HashMap::new(),
                next_waiter: 0,
                max_level,
            })),
        }
    }

    /// Acquire `(lock_type, key)` at `level`, waiting at most `deadline`.
    ///
    /// `None` waits until promoted.
    pub async fn acquire(
        &self,
        lock_type: LockType,
        key: u64,
        level: u32,
        deadline: Option<Duration>,
    ) -> Result<Ticket, LockError> {
        self.acquire_inner(lock_type, key, level, deadline, None)
            .await
    }

    /// Like [`acquire`](Self::acquire), also giving up when `cancel` fires.
    pub async fn acquire_with_cancel(
        &self,
        lock_type: LockType,
        key: u64,
        level: u32,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Ticket, LockError> {
        self.acquire_inner(lock_type, key, level, deadline, Some(cancel))
            .await
    }

    /// Whether a ticket is active for the key.
    pub fn is_locked(&self, lock_type: LockType, key: u64) -> bool {
        self.inner.borrow().keys.contains_key(&(lock_type, key))
    }

    /// Number of callers queued behind the active ticket.
    pub fn waiter_count(&self, lock_type: LockType, key: u64) -> usize {
        self.inner
            .borrow()
            .keys
            .get(&(lock_type, key))
            .map_or(0, |k| k.waiters.len())
    }

    /// Current nesting depth (0 when free).
    pub fn depth(&self, lock_type: LockType, key: u64) -> u32 {
        self.inner
            .borrow()
            .keys
            .get(&(lock_type, key))
            .map_or(0, |k| k.depth)
    }

    async fn acquire_inner(
        &self,
        lock_type: LockType,
        key: u64,
        level: u32,
        deadline: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Ticket, LockError> {
        let (id, mut rx) = {
            let mut state = self.inner.borrow_mut();
            if level > state.max_level {
                tracing::warn!(?lock_type, key, level, max = state.max_level, "lock level overflow");
                return Err(LockError::LevelOverflow {
                    level,
                    max: state.max_level,
                });
            }

            let State {
                keys, next_waiter, ..
            } = &mut *state;
            match keys.entry((lock_type, key)) {
                Entry::Vacant(slot) => {
                    slot.insert(KeyState {
                        depth: 1,
                        waiters: VecDeque::new(),
                    });
                    return Ok(self.ticket(lock_type, key, 0));
                }
                Entry::Occupied(mut slot) => {
                    let held = slot.get_mut();
                    if level > 0 && level == held.depth {
                        held.depth += 1;
                        tracing::trace!(?lock_type, key, level, "re-entrant lock granted");
                        return Ok(self.ticket(lock_type, key, level));
                    }

                    *next_waiter += 1;
                    let id = *next_waiter;
                    let (tx, rx) = oneshot::channel();
                    held.waiters.push_back(Waiter { id, grant: tx });
                    tracing::trace!(?lock_type, key, waiters = held.waiters.len(), "lock queued");
                    (id, rx)
                }
            }
        };

        let mut guard = WaitGuard {
            inner: self.inner.clone(),
            key: (lock_type, key),
            id,
            armed: true,
        };

        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let failure = tokio::select! {
            biased;
            granted = &mut rx => match granted {
                Ok(()) => {
                    guard.armed = false;
                    return Ok(self.ticket(lock_type, key, 0));
                }
                Err(_) => LockError::Cancelled { lock_type, key },
            },
            _ = timer => LockError::Timeout {
                lock_type,
                key,
                waited: deadline.unwrap_or_default(),
            },
            _ = cancelled => LockError::Cancelled { lock_type, key },
        };

        // A promotion that landed before we observed the deadline still counts.
        if rx.try_recv().is_ok() {
            guard.armed = false;
            return Ok(self.ticket(lock_type, key, 0));
        }

        drop(guard);
        tracing::debug!(?lock_type, key, error = %failure, "lock acquisition abandoned");
        Err(failure)
    }

    fn ticket(&self, lock_type: LockType, key: u64, level: u32) -> Ticket {
        Ticket {
            inner: self.inner.clone(),
            lock_type,
            key,
            level,
        }
    }
}

fn release(inner: &RefCell<State>, key: Key, level: u32) {
    let mut state = inner.borrow_mut();
    let Some(held) = state.keys.get_mut(&key) else {
        return;
    };

    if level > 0 {
        held.depth = held.depth.saturating_sub(1).max(1);
        return;
    }

    held.depth = 1;
    while let Some(waiter) = held.waiters.pop_front() {
        if waiter.grant.send(()).is_ok() {
            return;
        }
    }
    state.keys.remove(&key);
}

/// Removes an abandoned waiter from its queue, or releases a grant nobody
/// will ever turn into a [`Ticket`].
struct WaitGuard {
    inner: Rc<RefCell<State>>,
    key: Key,
    id: u64,
    armed: bool,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let promoted = {
            let mut state = self.inner.borrow_mut();
            match state.keys.get_mut(&self.key) {
                Some(held) => match held.waiters.iter().position(|w| w.id == self.id) {
                    Some(pos) => {
                        held.waiters.remove(pos);
                        false
                    }
                    None => true,
                },
                None => false,
            }
        };

        if promoted {
            release(&self.inner, self.key, 0);
        }
    }
}

/// Ownership of an [`AsyncMutex`] section. Dropping it releases the section.
pub struct Ticket {
    inner: Rc<RefCell<State>>,
    lock_type: LockType,
    key: u64,
    level: u32,
}

impl Ticket {
    /// Namespace of the held key.
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// The held key.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Nesting level this ticket was granted at (0 for the outer section).
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("lock_type", &self.lock_type)
            .field("key", &self.key)
            .field("level", &self.level)
            .finish()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        release(&self.inner, (self.lock_type, self.key), self.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::task::{spawn_local, yield_now, LocalSet};

    const UNIT: LockType = LockType::Location(LocationType::Unit);

    #[tokio::test]
    async fn test_uncontended_acquire() {
        let mutex = AsyncMutex::default();

        let ticket = mutex.acquire(UNIT, 1, 0, None).await.expect("free key");
        assert!(mutex.is_locked(UNIT, 1));
        assert!(!mutex.is_locked(UNIT, 2));
        assert_eq!(ticket.level(), 0);

        drop(ticket);
        assert!(!mutex.is_locked(UNIT, 1));
    }

    #[tokio::test]
    async fn test_grants_are_fifo_and_exclusive() {
        LocalSet::new()
            .run_until(async {
                let mutex = AsyncMutex::default();
                let order = Rc::new(RefCell::new(Vec::new()));
                let active = Rc::new(Cell::new(0u32));

                let first = mutex.acquire(UNIT, 7, 0, None).await.expect("free key");

                let mut tasks = Vec::new();
                for n in 1..=4 {
                    let mutex = mutex.clone();
                    let order = order.clone();
                    let active = active.clone();
                    tasks.push(spawn_local(async move {
                        let _ticket = mutex.acquire(UNIT, 7, 0, None).await.expect("queued");
                        active.set(active.get() + 1);
                        assert_eq!(active.get(), 1, "two tickets active at once");
                        order.borrow_mut().push(n);
                        yield_now().await;
                        active.set(active.get() - 1);
                    }));
                    // make queue order deterministic
                    yield_now().await;
                }

                assert_eq!(mutex.waiter_count(UNIT, 7), 4);
                drop(first);

                for task in tasks {
                    task.await.expect("task should not panic");
                }
                assert_eq!(*order.borrow(), vec![1, 2, 3, 4]);
                assert!(!mutex.is_locked(UNIT, 7));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_levels() {
        let mutex = AsyncMutex::default();

        let outer = mutex.acquire(UNIT, 3, 0, None).await.expect("free key");
        let nested = mutex
            .acquire(UNIT, 3, 1, Some(Duration::from_millis(10)))
            .await
            .expect("level 1 re-enters");
        let deeper = mutex
            .acquire(UNIT, 3, 2, Some(Duration::from_millis(10)))
            .await
            .expect("level 2 re-enters");
        assert_eq!(mutex.depth(UNIT, 3), 3);

        // a level that does not match the depth queues like anyone else
        let err = mutex
            .acquire(UNIT, 3, 1, Some(Duration::from_millis(10)))
            .await
            .expect_err("mismatched level should queue");
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(deeper);
        drop(nested);
        assert_eq!(mutex.depth(UNIT, 3), 1);
        assert!(mutex.is_locked(UNIT, 3));

        drop(outer);
        assert!(!mutex.is_locked(UNIT, 3));
    }

    #[tokio::test]
    async fn test_level_overflow() {
        let mutex = AsyncMutex::new(4);
        let err = mutex
            .acquire(UNIT, 1, 5, None)
            .await
            .expect_err("level above bound");
        assert_eq!(err, LockError::LevelOverflow { level: 5, max: 4 });
        assert!(!mutex.is_locked(UNIT, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_holder_intact() {
        let mutex = AsyncMutex::default();
        let t1 = mutex.acquire(UNIT, 9, 0, None).await.expect("free key");

        let started = tokio::time::Instant::now();
        let err = mutex
            .acquire(UNIT, 9, 0, Some(Duration::from_millis(100)))
            .await
            .expect_err("contended acquire should time out");
        assert!(matches!(err, LockError::Timeout { key: 9, .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(mutex.waiter_count(UNIT, 9), 0);

        drop(t1);
        assert!(!mutex.is_locked(UNIT, 9));
        let again = mutex
            .acquire(UNIT, 9, 0, Some(Duration::from_millis(1)))
            .await
            .expect("key is free after release");
        drop(again);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_dequeued() {
        LocalSet::new()
            .run_until(async {
                let mutex = AsyncMutex::default();
                let held = mutex.acquire(UNIT, 5, 0, None).await.expect("free key");
                let token = CancellationToken::new();

                let waiter = spawn_local({
                    let mutex = mutex.clone();
                    let token = token.clone();
                    async move { mutex.acquire_with_cancel(UNIT, 5, 0, None, &token).await }
                });
                yield_now().await;
                assert_eq!(mutex.waiter_count(UNIT, 5), 1);

                token.cancel();
                let result = waiter.await.expect("task should not panic");
                assert!(matches!(result, Err(LockError::Cancelled { key: 5, .. })));
                assert_eq!(mutex.waiter_count(UNIT, 5), 0);

                drop(held);
                assert!(!mutex.is_locked(UNIT, 5));
            })
            .await;
    }

    #[tokio::test]
    async fn test_dropped_acquire_future_leaves_queue() {
        LocalSet::new()
            .run_until(async {
                let mutex = AsyncMutex::default();
                let held = mutex.acquire(UNIT, 6, 0, None).await.expect("free key");

                let waiter = spawn_local({
                    let mutex = mutex.clone();
                    async move { mutex.acquire(UNIT, 6, 0, None).await }
                });
                yield_now().await;
                assert_eq!(mutex.waiter_count(UNIT, 6), 1);

                waiter.abort();
                let _ = waiter.await;
                assert_eq!(mutex.waiter_count(UNIT, 6), 0);

                drop(held);
                assert!(!mutex.is_locked(UNIT, 6));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_wins_over_late_deadline() {
        LocalSet::new()
            .run_until(async {
                let mutex = AsyncMutex::default();
                let held = mutex.acquire(UNIT, 8, 0, None).await.expect("free key");

                let waiter = spawn_local({
                    let mutex = mutex.clone();
                    async move {
                        mutex
                            .acquire(UNIT, 8, 0, Some(Duration::from_millis(50)))
                            .await
                    }
                });
                yield_now().await;

                // promote and expire the deadline before the waiter runs again
                drop(held);
                tokio::time::advance(Duration::from_millis(100)).await;

                let ticket = waiter
                    .await
                    .expect("task should not panic")
                    .expect("promotion should win");
                assert!(mutex.is_locked(UNIT, 8));
                drop(ticket);
                assert!(!mutex.is_locked(UNIT, 8));
            })
            .await;
    }
}
