use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::address::Address;
use crate::config::FiberConfig;
use crate::error::LocationError;
use crate::sync::{AsyncMutex, LockType};

use super::table::{LocationTable, LockEntry};
use super::LocationType;

/// Location tables of one fiber, with per-key relocation locks.
///
/// All operations run on the owning fiber. Mutations (`add`, `remove`,
/// `lock`) go through the fiber's [`AsyncMutex`] keyed by
/// `(LockType::Location(type), id)`, so they queue behind a relocation in
/// flight. `get` never suspends and returns the pre-lock address while a
/// relocation is in progress.
///
/// `lock` arms a hold timer: a lock still held when it fires is logged at
/// error severity and released with the key left at the locked address.
///
/// # Example
///
/// ```rust,ignore
/// let service = LocationService::new(fiber.mutex().clone(), fiber.config());
/// service.add(LocationType::Unit, 42, a).await?;
///
/// service.lock(LocationType::Unit, 42, a, Duration::from_secs(60)).await?;
/// assert_eq!(service.get(LocationType::Unit, 42), a);
/// service.unlock(LocationType::Unit, 42, a, b)?;
/// assert_eq!(service.get(LocationType::Unit, 42), b);
/// ```
pub struct LocationService {
    tables: RefCell<HashMap<LocationType, LocationTable>>,
    mutex: AsyncMutex,
    lock_timeout: Duration,
    generation: Cell<u64>,
    me: Weak<LocationService>,
}

impl LocationService {
    /// Create an empty service sharing `mutex`.
    pub fn new(mutex: AsyncMutex, config: &FiberConfig) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            tables: RefCell::new(HashMap::new()),
            mutex,
            lock_timeout: config.lock_timeout(),
            generation: Cell::new(0),
            me: me.clone(),
        })
    }

    /// Current address of `(location_type, id)`, or [`Address::ZERO`].
    pub fn get(&self, location_type: LocationType, id: u64) -> Address {
        self.tables
            .borrow()
            .get(&location_type)
            .map_or(Address::ZERO, |table| table.get(id))
    }

    /// Register or overwrite an entry.
    ///
    /// Waits for a relocation of the same key to finish first.
    pub async fn add(
        &self,
        location_type: LocationType,
        id: u64,
        address: Address,
    ) -> Result<(), LocationError> {
        let _ticket = self
            .mutex
            .acquire(LockType::Location(location_type), id, 0, Some(self.lock_timeout))
            .await?;
        self.with_table(location_type, |table| table.set(id, address));
        tracing::debug!(?location_type, id, %address, "location added");
        Ok(())
    }

    /// Delete an entry. Removing an absent key is a no-op.
    pub async fn remove(&self, location_type: LocationType, id: u64) -> Result<(), LocationError> {
        let _ticket = self
            .mutex
            .acquire(LockType::Location(location_type), id, 0, Some(self.lock_timeout))
            .await?;
        if let Some(address) = self.with_table(location_type, |table| table.remove(id)) {
            tracing::debug!(?location_type, id, %address, "location removed");
        }
        Ok(())
    }

    /// Freeze the key for a relocation away from `expected`.
    ///
    /// Waits up to `deadline` for the key, then checks that `expected` is
    /// still the stored address; queued lockers therefore see whatever the
    /// previous unlock installed. The lock is held until
    /// [`unlock`](Self::unlock) or until `deadline` elapses again.
    pub async fn lock(
        &self,
        location_type: LocationType,
        id: u64,
        expected: Address,
        deadline: Duration,
    ) -> Result<(), LocationError> {
        let ticket = self
            .mutex
            .acquire(LockType::Location(location_type), id, 0, Some(deadline))
            .await?;

        let actual = self.get(location_type, id);
        if actual != expected {
            tracing::error!(?location_type, id, %expected, %actual, "location lock refused: address mismatch");
            return Err(LocationError::AddressMismatch {
                location_type,
                id,
                expected,
                actual,
            });
        }

        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.with_table(location_type, |table| {
            table.install_lock(
                id,
                LockEntry {
                    holder: expected,
                    generation,
                    ticket,
                },
            )
        });
        tracing::debug!(?location_type, id, %expected, generation, "location locked");

        let me = self.me.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(deadline).await;
            if let Some(service) = me.upgrade() {
                service.expire(location_type, id, generation);
            }
        });
        Ok(())
    }

    /// Finish a relocation: install `new` and release the key.
    ///
    /// The outstanding lock must have been taken for `old`; anything else is
    /// a [`LocationError::LockMismatch`] and leaves the table untouched.
    /// A zero `new` removes the entry.
    pub fn unlock(
        &self,
        location_type: LocationType,
        id: u64,
        old: Address,
        new: Address,
    ) -> Result<(), LocationError> {
        let entry = self.with_table(location_type, |table| {
            let held = table.lock_holder(id);
            if held != Some(old) {
                return Err(held);
            }
            let entry = table.take_lock(id);
            table.set(id, new);
            Ok(entry)
        });

        match entry {
            Ok(entry) => {
                tracing::debug!(?location_type, id, %old, %new, "location unlocked");
                // Releasing the ticket lets queued lockers observe `new`.
                drop(entry);
                Ok(())
            }
            Err(held) => {
                tracing::error!(?location_type, id, caller = %old, ?held, "location unlock refused: lock mismatch");
                Err(LocationError::LockMismatch {
                    location_type,
                    id,
                    caller: old,
                    held,
                })
            }
        }
    }

    /// Whether a relocation lock is outstanding on the key.
    pub fn is_locked(&self, location_type: LocationType, id: u64) -> bool {
        self.tables
            .borrow()
            .get(&location_type)
            .and_then(|table| table.lock_holder(id))
            .is_some()
    }

    /// Number of registered ids of one type.
    pub fn len(&self, location_type: LocationType) -> usize {
        self.tables
            .borrow()
            .get(&location_type)
            .map_or(0, LocationTable::len)
    }

    fn expire(&self, location_type: LocationType, id: u64, generation: u64) {
        let entry = self.with_table(location_type, |table| table.take_lock_if(id, generation));
        if let Some(entry) = entry {
            tracing::error!(
                ?location_type,
                id,
                holder = %entry.holder,
                generation,
                "location lock held past its deadline; releasing at the locked address"
            );
            drop(entry.ticket);
        }
    }

    fn with_table<R>(
        &self,
        location_type: LocationType,
        f: impl FnOnce(&mut LocationTable) -> R,
    ) -> R {
        let mut tables = self.tables.borrow_mut();
        let table = tables
            .entry(location_type)
            .or_insert_with(|| LocationTable::new(location_type));
        f(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{EntityId, FiberId, ProcessId};
    use tokio::task::{spawn_local, yield_now, LocalSet};

    const UNIT: LocationType = LocationType::Unit;

    fn addr(p: u32, e: u32) -> Address {
        Address::encode(ProcessId(p), FiberId(0), EntityId(e)).expect("encode")
    }

    fn service() -> Rc<LocationService> {
        LocationService::new(AsyncMutex::default(), &FiberConfig::default())
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let service = service();
        assert_eq!(service.get(UNIT, 1), Address::ZERO);

        service.add(UNIT, 1, addr(1, 1)).await.expect("add");
        assert_eq!(service.get(UNIT, 1), addr(1, 1));
        // namespaces are independent
        assert_eq!(service.get(LocationType::Player, 1), Address::ZERO);

        service.add(UNIT, 1, addr(1, 2)).await.expect("overwrite");
        assert_eq!(service.get(UNIT, 1), addr(1, 2));
        assert_eq!(service.len(UNIT), 1);

        service.remove(UNIT, 1).await.expect("remove");
        service.remove(UNIT, 1).await.expect("removing twice is a no-op");
        service.remove(UNIT, 99).await.expect("removing unknown is a no-op");
        assert_eq!(service.get(UNIT, 1), Address::ZERO);
    }

    #[tokio::test]
    async fn test_lock_unlock_end_to_end() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                let a = addr(1, 42);
                let b = addr(2, 7);
                service.add(UNIT, 42, a).await.expect("add");

                service
                    .lock(UNIT, 42, a, Duration::from_secs(60))
                    .await
                    .expect("uncontended lock");
                assert!(service.is_locked(UNIT, 42));
                assert_eq!(service.get(UNIT, 42), a);

                service.unlock(UNIT, 42, a, b).expect("unlock");
                assert!(!service.is_locked(UNIT, 42));
                assert_eq!(service.get(UNIT, 42), b);
            })
            .await;
    }

    #[tokio::test]
    async fn test_queued_lock_observes_new_address() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                let a = addr(1, 1);
                let b = addr(2, 1);
                service.add(UNIT, 5, a).await.expect("add");
                service
                    .lock(UNIT, 5, a, Duration::from_secs(60))
                    .await
                    .expect("first lock");

                let follow_up = spawn_local({
                    let service = service.clone();
                    async move { service.lock(UNIT, 5, b, Duration::from_secs(60)).await }
                });
                let stale = spawn_local({
                    let service = service.clone();
                    async move { service.lock(UNIT, 5, a, Duration::from_secs(60)).await }
                });
                yield_now().await;
                assert!(!follow_up.is_finished());

                service.unlock(UNIT, 5, a, b).expect("unlock");
                follow_up
                    .await
                    .expect("task should not panic")
                    .expect("queued lock sees the new address");
                assert_eq!(service.get(UNIT, 5), b);

                service.unlock(UNIT, 5, b, b).expect("release second lock");
                let err = stale
                    .await
                    .expect("task should not panic")
                    .expect_err("stale expectation");
                assert!(matches!(
                    err,
                    LocationError::AddressMismatch { expected, actual, .. } if expected == a && actual == b
                ));
                assert!(!service.is_locked(UNIT, 5));
            })
            .await;
    }

    #[tokio::test]
    async fn test_lock_rejects_stale_expectation() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                service.add(UNIT, 3, addr(1, 3)).await.expect("add");

                let err = service
                    .lock(UNIT, 3, addr(9, 9), Duration::from_secs(1))
                    .await
                    .expect_err("mismatch");
                assert!(matches!(err, LocationError::AddressMismatch { .. }));
                assert!(!service.is_locked(UNIT, 3));

                // the key was released: a correct lock goes through
                service
                    .lock(UNIT, 3, addr(1, 3), Duration::from_secs(1))
                    .await
                    .expect("lock");
                service.unlock(UNIT, 3, addr(1, 3), addr(1, 3)).expect("unlock");
            })
            .await;
    }

    #[tokio::test]
    async fn test_unlock_mismatch_leaves_mapping() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                let a = addr(1, 8);
                service.add(UNIT, 8, a).await.expect("add");

                let err = service
                    .unlock(UNIT, 8, a, addr(2, 8))
                    .expect_err("no outstanding lock");
                assert!(matches!(err, LocationError::LockMismatch { held: None, .. }));

                service
                    .lock(UNIT, 8, a, Duration::from_secs(60))
                    .await
                    .expect("lock");
                let err = service
                    .unlock(UNIT, 8, addr(3, 3), addr(2, 8))
                    .expect_err("wrong holder");
                assert!(matches!(err, LocationError::LockMismatch { held: Some(h), .. } if h == a));
                assert_eq!(service.get(UNIT, 8), a);
                assert!(service.is_locked(UNIT, 8));

                service.unlock(UNIT, 8, a, Address::ZERO).expect("unlock to zero");
                assert_eq!(service.get(UNIT, 8), Address::ZERO);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_releases_at_old_address() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                let a = addr(1, 4);
                service.add(UNIT, 4, a).await.expect("add");
                service
                    .lock(UNIT, 4, a, Duration::from_secs(1))
                    .await
                    .expect("lock");

                tokio::time::sleep(Duration::from_secs(2)).await;
                assert!(!service.is_locked(UNIT, 4));
                assert_eq!(service.get(UNIT, 4), a);

                let err = service
                    .unlock(UNIT, 4, a, addr(2, 4))
                    .expect_err("lock already expired");
                assert!(matches!(err, LocationError::LockMismatch { .. }));
                assert_eq!(service.get(UNIT, 4), a);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_waits_for_relocation() {
        LocalSet::new()
            .run_until(async {
                let service = service();
                let a = addr(1, 6);
                service.add(UNIT, 6, a).await.expect("add");
                service
                    .lock(UNIT, 6, a, Duration::from_secs(60))
                    .await
                    .expect("lock");

                let add = spawn_local({
                    let service = service.clone();
                    async move { service.add(UNIT, 6, addr(3, 6)).await }
                });
                yield_now().await;
                assert!(!add.is_finished());
                assert_eq!(service.get(UNIT, 6), a);

                service.unlock(UNIT, 6, a, addr(2, 6)).expect("unlock");
                add.await.expect("task should not panic").expect("add");
                assert_eq!(service.get(UNIT, 6), addr(3, 6));
            })
            .await;
    }
}
