// src/services/accepted_trips.rs
use crate::models::{AcceptedTrip, PickupStatus, ReservationId};

/// Trips the driver committed to, in acceptance order.
#[derive(Debug, Default)]
pub struct AcceptedTripSet {
    trips: Vec<AcceptedTrip>,
}

impl AcceptedTripSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a trip with the same id is already held.
    pub fn insert(&mut self, trip: AcceptedTrip) -> bool {
        if self.contains(&trip.id) {
            return false;
        }
        self.trips.push(trip);
        true
    }

    pub fn get(&self, id: &ReservationId) -> Option<&AcceptedTrip> {
        self.trips.iter().find(|trip| &trip.id == id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut AcceptedTrip> {
        self.trips.iter_mut().find(|trip| &trip.id == id)
    }

    pub fn remove(&mut self, id: &ReservationId) -> Option<AcceptedTrip> {
        let index = self.trips.iter().position(|trip| &trip.id == id)?;
        Some(self.trips.remove(index))
    }

    pub fn contains(&self, id: &ReservationId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<ReservationId> {
        self.trips.iter().map(|trip| trip.id.clone()).collect()
    }

    /// Passengers on board, in acceptance order. This is the pooled batch.
    pub fn picked_up_ids(&self) -> Vec<ReservationId> {
        self.trips
            .iter()
            .filter(|trip| trip.pickup_status == PickupStatus::PickedUp)
            .map(|trip| trip.id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcceptedTrip> {
        self.trips.iter()
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn clear(&mut self) {
        self.trips.clear();
    }
}
