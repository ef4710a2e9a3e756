// src/models/trip.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::offer::{PassengerInfo, ReservationId, TripOffer};
use crate::utils::geo::LatLng;

/// Per-trip pickup progress, independent of the driver-wide step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Pending,     // Accepted, driver not heading there yet
    Approaching, // Driver is on the way to this pickup
    Arrived,     // Driver is waiting at the pickup point
    PickedUp,    // Passenger is on board
}

/// Driver-wide ride lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStep {
    Idle,
    ToPickup,
    AtPickup,
    ReadyToStart,
    InProgress,
}

impl TripStep {
    /// Edges a driver action may take. Forced resets to `Idle` (cancellation,
    /// going offline) bypass this table.
    pub fn can_transition_to(self, next: TripStep) -> bool {
        use TripStep::*;
        matches!(
            (self, next),
            (Idle, ToPickup)
                | (ReadyToStart, ToPickup)
                | (ToPickup, AtPickup)
                | (AtPickup, ReadyToStart)
                | (Idle | ToPickup | AtPickup | ReadyToStart, InProgress)
                | (InProgress, Idle)
        )
    }

    pub fn is_active(self) -> bool {
        self != TripStep::Idle
    }
}

impl fmt::Display for TripStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripStep::Idle => "idle",
            TripStep::ToPickup => "to_pickup",
            TripStep::AtPickup => "at_pickup",
            TripStep::ReadyToStart => "ready_to_start",
            TripStep::InProgress => "in_progress",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Offline,
    Available,
    Busy,
}

impl DriverStatus {
    pub fn derive(is_online: bool, step: TripStep) -> Self {
        match (is_online, step.is_active()) {
            (false, _) => DriverStatus::Offline,
            (true, true) => DriverStatus::Busy,
            (true, false) => DriverStatus::Available,
        }
    }
}

/// A trip the driver committed to, promoted from an offer after the server
/// confirmed the acceptance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedTrip {
    pub id: ReservationId,
    pub pickup: Option<LatLng>,
    pub destination: Option<LatLng>,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub passenger: Option<PassengerInfo>,
    pub distance_km: Option<f64>,
    pub pickup_status: PickupStatus,
    pub accepted_at: DateTime<Utc>,
}

impl AcceptedTrip {
    pub fn from_offer(offer: TripOffer) -> Self {
        Self {
            id: offer.id,
            pickup: offer.pickup,
            destination: offer.destination,
            pickup_address: offer.pickup_address,
            destination_address: offer.destination_address,
            passenger: offer.passenger,
            distance_km: offer.distance_km,
            pickup_status: PickupStatus::Pending,
            accepted_at: Utc::now(),
        }
    }

    pub fn passenger_name(&self) -> Option<String> {
        self.passenger.as_ref().and_then(PassengerInfo::display_name)
    }
}

/// Per-day activity counters. They reset when the calendar day changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounters {
    pub requested: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub day: NaiveDate,
}

impl DailyCounters {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            requested: 0,
            accepted: 0,
            rejected: 0,
            day,
        }
    }

    pub fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            *self = Self::new(today);
        }
    }

    pub fn record_requested(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.requested = self.requested.saturating_add(1);
    }

    pub fn record_accepted(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.accepted = self.accepted.saturating_add(1);
    }

    pub fn record_rejected(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.rejected = self.rejected.saturating_add(1);
    }
}
