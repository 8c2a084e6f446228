use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::adapters::{AdapterError, PoolRepository, RideRepository};
use crate::models::pool::{PassengerStatus, PoolPassenger, PoolRide, PoolStatus, RouteStop};
use crate::models::ride::{Ride, RideStatus};

#[derive(Default)]
pub struct RideBook {
    rides: DashMap<Uuid, Ride>,
}

impl RideBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ride: Ride) {
        self.rides.insert(ride.id, ride);
    }

    pub fn get(&self, id: &Uuid) -> Option<Ride> {
        self.rides.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }

    /// Applies `update` only when the ride is currently in one of `from`.
    pub fn transition(
        &self,
        id: &Uuid,
        from: &[RideStatus],
        update: impl FnOnce(&mut Ride),
    ) -> Option<Result<Ride, RideStatus>> {
        let mut ride = self.rides.get_mut(id)?;
        if !from.contains(&ride.status) {
            return Some(Err(ride.status));
        }

        update(ride.value_mut());
        Some(Ok(ride.clone()))
    }
}

#[async_trait]
impl RideRepository for RideBook {
    async fn ride_status(&self, ride_id: Uuid) -> Result<Option<RideStatus>, AdapterError> {
        Ok(self.rides.get(&ride_id).map(|ride| ride.status))
    }
}

#[derive(Default)]
pub struct MemoryPoolRepository {
    pools: DashMap<Uuid, PoolRide>,
    passengers: DashMap<Uuid, PoolPassenger>,
    /// Latest passenger record per rider.
    riders: DashMap<Uuid, Uuid>,
}

impl MemoryPoolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn passenger_count(&self) -> usize {
        self.passengers.len()
    }
}

#[async_trait]
impl PoolRepository for MemoryPoolRepository {
    async fn insert_pool(&self, pool: PoolRide) -> Result<(), AdapterError> {
        self.pools.insert(pool.id, pool);
        Ok(())
    }

    async fn get_pool(&self, id: Uuid) -> Result<Option<PoolRide>, AdapterError> {
        Ok(self.pools.get(&id).map(|entry| entry.value().clone()))
    }

    async fn transition_pool(
        &self,
        pool_id: Uuid,
        from: PoolStatus,
        to: PoolStatus,
    ) -> Result<Option<PoolRide>, AdapterError> {
        let Some(mut pool) = self.pools.get_mut(&pool_id) else {
            return Ok(None);
        };
        if pool.status != from {
            return Ok(None);
        }

        pool.status = to;
        pool.updated_at = Utc::now();
        Ok(Some(pool.clone()))
    }

    async fn assign_driver(
        &self,
        pool_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Option<Uuid>,
    ) -> Result<Option<PoolRide>, AdapterError> {
        let Some(mut pool) = self.pools.get_mut(&pool_id) else {
            return Ok(None);
        };
        if pool.status != PoolStatus::Matching {
            return Ok(None);
        }

        pool.driver_id = Some(driver_id);
        pool.vehicle_id = vehicle_id;
        pool.status = PoolStatus::Confirmed;
        pool.updated_at = Utc::now();
        Ok(Some(pool.clone()))
    }

    async fn update_route(
        &self,
        pool_id: Uuid,
        stops: Vec<RouteStop>,
        total_distance_km: f64,
        total_duration_minutes: f64,
    ) -> Result<(), AdapterError> {
        let mut pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| AdapterError::Repository(format!("pool ride {pool_id} does not exist")))?;

        pool.stops = stops;
        pool.total_distance_km = total_distance_km;
        pool.total_duration_minutes = total_duration_minutes;
        pool.updated_at = Utc::now();
        Ok(())
    }

    async fn find_matching_pools(
        &self,
        cell_ids: &[String],
        now: DateTime<Utc>,
        seats: u32,
    ) -> Result<Vec<PoolRide>, AdapterError> {
        Ok(self
            .pools
            .iter()
            .filter(|entry| {
                let pool = entry.value();
                pool.status == PoolStatus::Matching
                    && pool.matching_deadline > now
                    && pool.has_room_for(seats)
                    && cell_ids.contains(&pool.cell_id)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn try_add_passengers(
        &self,
        pool_id: Uuid,
        seats: u32,
    ) -> Result<Option<PoolRide>, AdapterError> {
        let Some(mut pool) = self.pools.get_mut(&pool_id) else {
            return Ok(None);
        };

        if pool.status != PoolStatus::Matching
            || pool.matching_deadline <= Utc::now()
            || !pool.has_room_for(seats)
        {
            return Ok(None);
        }

        pool.current_passengers += seats;
        pool.updated_at = Utc::now();
        Ok(Some(pool.clone()))
    }

    async fn release_passengers(&self, pool_id: Uuid, seats: u32) -> Result<(), AdapterError> {
        if let Some(mut pool) = self.pools.get_mut(&pool_id) {
            pool.current_passengers = pool.current_passengers.saturating_sub(seats);
            pool.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn expired_matching_pools(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PoolRide>, AdapterError> {
        Ok(self
            .pools
            .iter()
            .filter(|entry| {
                entry.value().status == PoolStatus::Matching && entry.value().matching_deadline <= now
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_passenger(&self, passenger: PoolPassenger) -> Result<bool, AdapterError> {
        // The rider slot stays locked until the passenger is stored.
        match self.riders.entry(passenger.rider_id) {
            Entry::Occupied(mut slot) => {
                let busy = self
                    .passengers
                    .get(slot.get())
                    .is_some_and(|existing| !existing.status.is_terminal());
                if busy {
                    return Ok(false);
                }
                slot.insert(passenger.id);
                self.passengers.insert(passenger.id, passenger);
            }
            Entry::Vacant(slot) => {
                slot.insert(passenger.id);
                self.passengers.insert(passenger.id, passenger);
            }
        }
        Ok(true)
    }

    async fn get_passenger(&self, id: Uuid) -> Result<Option<PoolPassenger>, AdapterError> {
        Ok(self.passengers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_passenger(
        &self,
        passenger: PoolPassenger,
        expected: PassengerStatus,
    ) -> Result<bool, AdapterError> {
        let Some(mut existing) = self.passengers.get_mut(&passenger.id) else {
            return Err(AdapterError::Repository(format!(
                "pool passenger {} does not exist",
                passenger.id
            )));
        };
        if existing.status != expected {
            return Ok(false);
        }

        *existing = passenger;
        Ok(true)
    }

    async fn passengers_for_pool(
        &self,
        pool_id: Uuid,
    ) -> Result<Vec<PoolPassenger>, AdapterError> {
        let mut passengers: Vec<PoolPassenger> = self
            .passengers
            .iter()
            .filter(|entry| entry.value().pool_ride_id == pool_id)
            .map(|entry| entry.value().clone())
            .collect();

        passengers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(passengers)
    }

    async fn active_passenger_for_rider(
        &self,
        rider_id: Uuid,
    ) -> Result<Option<PoolPassenger>, AdapterError> {
        Ok(self
            .passengers
            .iter()
            .find(|entry| entry.value().rider_id == rider_id && !entry.value().status.is_terminal())
            .map(|entry| entry.value().clone()))
    }
}
