use std::time::Duration;

use crate::address::Address;
use crate::error::LocationError;

use super::{LocationService, LocationType};

/// Access to a location service, local or remote.
///
/// Used by [`TransferCoordinator`](crate::transfer::TransferCoordinator)
/// and [`LocationSender`](crate::messaging::LocationSender) so they work the
/// same whether the tables live on the calling fiber or elsewhere.
#[async_trait::async_trait(?Send)]
pub trait LocationClient {
    /// Current address, or [`Address::ZERO`].
    async fn get(&self, location_type: LocationType, id: u64) -> Result<Address, LocationError>;

    /// Register or overwrite an entry.
    async fn add(
        &self,
        location_type: LocationType,
        id: u64,
        address: Address,
    ) -> Result<(), LocationError>;

    /// Delete an entry; idempotent.
    async fn remove(&self, location_type: LocationType, id: u64) -> Result<(), LocationError>;

    /// Freeze the key for a relocation away from `expected`.
    async fn lock(
        &self,
        location_type: LocationType,
        id: u64,
        expected: Address,
        deadline: Duration,
    ) -> Result<(), LocationError>;

    /// Install `new` and release a lock taken for `old`.
    async fn unlock(
        &self,
        location_type: LocationType,
        id: u64,
        old: Address,
        new: Address,
    ) -> Result<(), LocationError>;
}

#[async_trait::async_trait(?Send)]
impl LocationClient for LocationService {
    async fn get(&self, location_type: LocationType, id: u64) -> Result<Address, LocationError> {
        Ok(LocationService::get(self, location_type, id))
    }

    async fn add(
        &self,
        location_type: LocationType,
        id: u64,
        address: Address,
    ) -> Result<(), LocationError> {
        LocationService::add(self, location_type, id, address).await
    }

    async fn remove(&self, location_type: LocationType, id: u64) -> Result<(), LocationError> {
        LocationService::remove(self, location_type, id).await
    }

    async fn lock(
        &self,
        location_type: LocationType,
        id: u64,
        expected: Address,
        deadline: Duration,
    ) -> Result<(), LocationError> {
        LocationService::lock(self, location_type, id, expected, deadline).await
    }

    async fn unlock(
        &self,
        location_type: LocationType,
        id: u64,
        old: Address,
        new: Address,
    ) -> Result<(), LocationError> {
        LocationService::unlock(self, location_type, id, old, new)
    }
}
