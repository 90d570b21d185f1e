use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::codec::MessageCodec;
use crate::error::{HandlerError, LocationError, LockError, MessagingError};
use crate::fiber::{Fiber, SystemFuture, SystemHandler};
use crate::messaging::kinds;
use crate::sync::LockType;

use super::{LocationClient, LocationService, LocationType};

#[derive(Debug, Serialize, Deserialize)]
enum LocationRequest {
    Get {
        location_type: LocationType,
        id: u64,
    },
    Add {
        location_type: LocationType,
        id: u64,
        address: Address,
    },
    Remove {
        location_type: LocationType,
        id: u64,
    },
    Lock {
        location_type: LocationType,
        id: u64,
        expected: Address,
        deadline_ms: u64,
    },
    Unlock {
        location_type: LocationType,
        id: u64,
        old: Address,
        new: Address,
    },
}

/// Wire form of a [`LocationError`] raised on the host.
#[derive(Debug, Serialize, Deserialize)]
enum LocationFault {
    AddressMismatch { expected: Address, actual: Address },
    LockMismatch { caller: Address, held: Option<Address> },
    Timeout { waited_ms: u64 },
    Cancelled,
    Overflow { level: u32, max: u32 },
    Other(String),
}

impl From<LocationError> for LocationFault {
    fn from(error: LocationError) -> Self {
        match error {
            LocationError::AddressMismatch {
                expected, actual, ..
            } => LocationFault::AddressMismatch { expected, actual },
            LocationError::LockMismatch { caller, held, .. } => {
                LocationFault::LockMismatch { caller, held }
            }
            LocationError::Lock(LockError::Timeout { waited, .. }) => LocationFault::Timeout {
                waited_ms: duration_ms(waited),
            },
            LocationError::Lock(LockError::Cancelled { .. }) => LocationFault::Cancelled,
            LocationError::Lock(LockError::LevelOverflow { level, max }) => {
                LocationFault::Overflow { level, max }
            }
            other => LocationFault::Other(other.to_string()),
        }
    }
}

impl LocationFault {
    fn into_error(self, location_type: LocationType, id: u64) -> LocationError {
        let lock_type = LockType::Location(location_type);
        match self {
            LocationFault::AddressMismatch { expected, actual } => LocationError::AddressMismatch {
                location_type,
                id,
                expected,
                actual,
            },
            LocationFault::LockMismatch { caller, held } => LocationError::LockMismatch {
                location_type,
                id,
                caller,
                held,
            },
            LocationFault::Timeout { waited_ms } => LocationError::Lock(LockError::Timeout {
                lock_type,
                key: id,
                waited: Duration::from_millis(waited_ms),
            }),
            LocationFault::Cancelled => LocationError::Lock(LockError::Cancelled {
                lock_type,
                key: id,
            }),
            LocationFault::Overflow { level, max } => {
                LocationError::Lock(LockError::LevelOverflow { level, max })
            }
            LocationFault::Other(reason) => LocationError::Remote(reason),
        }
    }
}

type LocationReply = Result<Address, LocationFault>;

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// [`LocationClient`] for a [`LocationService`] hosted on another fiber.
///
/// Every operation is one call to the host fiber's root address. `lock`
/// waits up to its deadline on the host, so the call itself gets the
/// fiber's call timeout on top.
pub struct LocationProxy<C: MessageCodec> {
    fiber: Weak<Fiber<C>>,
    host: Address,
}

impl<C: MessageCodec> LocationProxy<C> {
    /// Proxy calling from `fiber` to the service rooted at `host`.
    pub fn new(fiber: Weak<Fiber<C>>, host: Address) -> Self {
        Self {
            fiber,
            host: host.fiber_root(),
        }
    }

    /// Root address of the hosting fiber.
    pub fn host(&self) -> Address {
        self.host
    }

    async fn request(
        &self,
        location_type: LocationType,
        id: u64,
        request: LocationRequest,
        extra: Duration,
    ) -> Result<Address, LocationError> {
        let fiber = self.fiber.upgrade().ok_or(MessagingError::Closed)?;
        let payload = fiber
            .codec()
            .encode(&request)
            .map_err(MessagingError::from)?;
        let deadline = fiber.config().call_timeout() + extra;
        let body = fiber
            .router()
            .call(fiber.address(), self.host, kinds::LOCATION, payload, deadline)
            .await?;
        let reply: LocationReply = fiber.codec().decode(&body).map_err(MessagingError::from)?;
        reply.map_err(|fault| fault.into_error(location_type, id))
    }
}

#[async_trait::async_trait(?Send)]
impl<C: MessageCodec> LocationClient for LocationProxy<C> {
    async fn get(&self, location_type: LocationType, id: u64) -> Result<Address, LocationError> {
        let request = LocationRequest::Get { location_type, id };
        self.request(location_type, id, request, Duration::ZERO)
            .await
    }

    async fn add(
        &self,
        location_type: LocationType,
        id: u64,
        address: Address,
    ) -> Result<(), LocationError> {
        let request = LocationRequest::Add {
            location_type,
            id,
            address,
        };
        self.request(location_type, id, request, Duration::ZERO)
            .await
            .map(|_| ())
    }

    async fn remove(&self, location_type: LocationType, id: u64) -> Result<(), LocationError> {
        let request = LocationRequest::Remove { location_type, id };
        self.request(location_type, id, request, Duration::ZERO)
            .await
            .map(|_| ())
    }

    async fn lock(
        &self,
        location_type: LocationType,
        id: u64,
        expected: Address,
        deadline: Duration,
    ) -> Result<(), LocationError> {
        let request = LocationRequest::Lock {
            location_type,
            id,
            expected,
            deadline_ms: duration_ms(deadline),
        };
        self.request(location_type, id, request, deadline)
            .await
            .map(|_| ())
    }

    async fn unlock(
        &self,
        location_type: LocationType,
        id: u64,
        old: Address,
        new: Address,
    ) -> Result<(), LocationError> {
        let request = LocationRequest::Unlock {
            location_type,
            id,
            old,
            new,
        };
        self.request(location_type, id, request, Duration::ZERO)
            .await
            .map(|_| ())
    }
}

async fn apply(service: &LocationService, request: LocationRequest) -> LocationReply {
    let outcome = match request {
        LocationRequest::Get { location_type, id } => Ok(service.get(location_type, id)),
        LocationRequest::Add {
            location_type,
            id,
            address,
        } => service
            .add(location_type, id, address)
            .await
            .map(|_| Address::ZERO),
        LocationRequest::Remove { location_type, id } => service
            .remove(location_type, id)
            .await
            .map(|_| Address::ZERO),
        LocationRequest::Lock {
            location_type,
            id,
            expected,
            deadline_ms,
        } => service
            .lock(location_type, id, expected, Duration::from_millis(deadline_ms))
            .await
            .map(|_| Address::ZERO),
        LocationRequest::Unlock {
            location_type,
            id,
            old,
            new,
        } => service
            .unlock(location_type, id, old, new)
            .map(|_| Address::ZERO),
    };
    outcome.map_err(LocationFault::from)
}

/// System handler answering [`LocationProxy`] requests from `service`.
pub(crate) fn serve<C: MessageCodec>(service: Rc<LocationService>) -> SystemHandler<C> {
    Rc::new(move |fiber: Rc<Fiber<C>>, payload: Vec<u8>| -> SystemFuture {
        let service = service.clone();
        Box::pin(async move {
            let request: LocationRequest = fiber.codec().decode(&payload)?;
            tracing::trace!(host = %fiber.address(), ?request, "location request");
            let reply = apply(&service, request).await;
            Ok::<_, HandlerError>(fiber.codec().encode(&reply)?)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{FiberId, ProcessId};
    use crate::codec::JsonCodec;
    use crate::config::FiberConfig;
    use crate::fiber::Process;
    use crate::messaging::LocalNetwork;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn test_proxy_round_trips_through_host() {
        LocalSet::new()
            .run_until(async {
                let network = LocalNetwork::new();
                let process = Process::new(ProcessId(1), network.clone());
                network.attach(&process);

                let host = Fiber::start(&process, FiberId(0), JsonCodec, FiberConfig::default())
                    .expect("host fiber");
                let service = host.host_location();
                let client = Fiber::start(&process, FiberId(1), JsonCodec, FiberConfig::default())
                    .expect("client fiber");
                client.connect_location(host.address());
                let proxy = client.location().expect("proxy");

                let a = Address::from_u64(0x0004_0001_0000_0007);
                let b = Address::from_u64(0x0004_0002_0000_0009);

                proxy.add(LocationType::Unit, 42, a).await.expect("add");
                assert_eq!(service.get(LocationType::Unit, 42), a);
                assert_eq!(proxy.get(LocationType::Unit, 42).await.expect("get"), a);

                proxy
                    .lock(LocationType::Unit, 42, a, Duration::from_secs(5))
                    .await
                    .expect("lock");
                assert!(service.is_locked(LocationType::Unit, 42));

                let err = proxy
                    .unlock(LocationType::Unit, 42, b, b)
                    .await
                    .expect_err("wrong holder");
                assert!(matches!(err, LocationError::LockMismatch { id: 42, .. }));

                proxy
                    .unlock(LocationType::Unit, 42, a, b)
                    .await
                    .expect("unlock");
                assert_eq!(proxy.get(LocationType::Unit, 42).await.expect("get"), b);

                let err = proxy
                    .lock(LocationType::Unit, 42, a, Duration::from_secs(5))
                    .await
                    .expect_err("stale");
                match err {
                    LocationError::AddressMismatch {
                        expected, actual, ..
                    } => {
                        assert_eq!(expected, a);
                        assert_eq!(actual, b);
                    }
                    other => panic!("unexpected error: {other}"),
                }

                proxy.remove(LocationType::Unit, 42).await.expect("remove");
                assert!(proxy.get(LocationType::Unit, 42).await.expect("get").is_zero());
            })
            .await;
    }
}
