// src/services/reconciler.rs
//! Applies server-pushed events to the driver session.
//!
//! Everything here is best-effort and local: a payload without an id, or an
//! id no longer held, is logged and dropped. Nothing is retried.

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{
    AcceptConfirmation, AcceptedTrip, AlertLevel, CancellationNotice, InboundEvent, PassengerInfo,
    RawOffer, ReservationKeys, ReservationRef, RoomRefusal, TripOffer, TripStep,
};
use crate::services::session::{today, DriverSession};

impl DriverSession {
    pub fn handle_inbound(&mut self, event: InboundEvent, now: Instant) {
        debug!(event = event.name(), "Inbound realtime event");
        match event {
            InboundEvent::OfferRequested(raw) => self.on_offer_requested(raw, now),
            InboundEvent::AcceptConfirmed(confirmation) => self.on_accept_confirmed(confirmation, now),
            InboundEvent::AlreadyTaken(reference) => self.on_already_taken(reference),
            InboundEvent::RejectConfirmed(reference) => self.on_reject_confirmed(reference),
            InboundEvent::TripCancelled(notice) => self.on_trip_cancelled(notice),
            InboundEvent::RoomJoined(reference) => {
                if let Some(id) = reference.reservation_id() {
                    debug!(reservation_id = %id, "Joined trip room");
                }
            }
            InboundEvent::RoomJoinRefused(refusal) => self.on_room_refused(refusal, now),
        }
    }

    fn on_offer_requested(&mut self, raw: RawOffer, now: Instant) {
        if self.trip_step == TripStep::InProgress {
            debug!("Ride in progress; ignoring trip offer");
            return;
        }
        let Some(id) = raw.ids.get().cloned() else {
            warn!("Trip offer without reservation id; dropping");
            return;
        };
        if self.offers.is_seen(&id) || self.accepted.contains(&id) {
            debug!(reservation_id = %id, "Duplicate trip offer; ignoring");
            return;
        }

        let Some(offer) = TripOffer::from_request(
            raw,
            self.driver_location,
            self.settings.max_offer_distance_km,
            self.settings.offer_countdown_secs,
            now,
        ) else {
            return;
        };

        info!(
            reservation_id = %offer.id,
            distance_km = ?offer.distance_km,
            too_far = offer.too_far,
            countdown_secs = offer.countdown_secs,
            "Trip offer received"
        );
        self.offers.insert(offer);
        self.counters.record_requested(today());
    }

    fn on_accept_confirmed(&mut self, confirmation: AcceptConfirmation, now: Instant) {
        let Some(id) = confirmation.id().cloned() else {
            warn!("Accept confirmation without reservation id; dropping");
            return;
        };
        if self.accepted.contains(&id) {
            debug!(reservation_id = %id, "Accept already confirmed");
            return;
        }

        let offer = match self.offers.remove(&id) {
            Some(offer) => offer,
            None => {
                let Some(mut raw) = confirmation.reservation else {
                    warn!(reservation_id = %id, "Accept confirmed for an offer that is no longer held");
                    return;
                };
                warn!(
                    reservation_id = %id,
                    "Accept confirmed for an offer that is no longer held; using the confirmed reservation"
                );
                raw.ids = ReservationKeys::new(id.clone());
                let Some(offer) = TripOffer::from_request(
                    raw,
                    self.driver_location,
                    self.settings.max_offer_distance_km,
                    self.settings.offer_countdown_secs,
                    now,
                ) else {
                    return;
                };
                offer
            }
        };

        self.accepted.insert(AcceptedTrip::from_offer(offer));
        self.counters.record_accepted(today());
        info!(reservation_id = %id, accepted = self.accepted.len(), "Trip accepted");
        self.sync_rooms();
    }

    /// Another driver won the race. Silent for the driver.
    fn on_already_taken(&mut self, reference: ReservationRef) {
        let Some(id) = reference.reservation_id().cloned() else {
            warn!("Already-taken notice without reservation id; dropping");
            return;
        };
        self.offers.remove(&id);
        self.offers.forget(&id);
        info!(reservation_id = %id, "Trip taken by another driver");
    }

    fn on_reject_confirmed(&mut self, reference: ReservationRef) {
        let Some(id) = reference.reservation_id().cloned() else {
            warn!("Reject confirmation without reservation id; dropping");
            return;
        };
        let removed = self.offers.remove(&id).is_some();
        self.offers.forget(&id);
        if removed {
            self.counters.record_rejected(today());
            info!(reservation_id = %id, "Trip rejected");
        } else {
            debug!(reservation_id = %id, "Reject confirmed for an offer that is no longer held");
        }
    }

    fn on_trip_cancelled(&mut self, notice: CancellationNotice) {
        let Some(id) = notice.reservation_id().cloned() else {
            warn!("Cancellation without reservation id; dropping");
            return;
        };

        let passenger = self
            .accepted
            .get(&id)
            .and_then(AcceptedTrip::passenger_name)
            .or_else(|| self.offers.get(&id).and_then(TripOffer::passenger_name))
            .or_else(|| notice.passenger.as_ref().and_then(PassengerInfo::display_name));

        let held_offer = self.offers.remove(&id).is_some();
        let held_trip = self.accepted.remove(&id).is_some();
        self.offers.forget(&id);

        let was_current = self.current_pickup_trip_id.as_ref() == Some(&id);
        if was_current {
            self.reset_to_idle();
        }
        warn!(reservation_id = %id, held_offer, held_trip, was_current, "Trip cancelled");

        let mut message = match &passenger {
            Some(name) => format!("{} cancelled the trip.", name),
            None => "The passenger cancelled the trip.".to_string(),
        };
        if let Some(reason) = notice.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            message.push_str(&format!(" Reason: {}", reason));
        }
        self.alerts
            .raise_persistent(AlertLevel::Critical, "Trip cancelled", message);

        if held_trip {
            self.sync_rooms();
        }
    }

    fn on_room_refused(&mut self, refusal: RoomRefusal, now: Instant) {
        let id = refusal
            .reservation_id()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let reason = refusal.reason.unwrap_or_else(|| "refused by server".to_string());
        warn!(reservation_id = %id, %reason, "Trip room join refused");
        self.alerts.raise_transient(
            AlertLevel::Warning,
            "Trip updates unavailable",
            format!("Could not follow trip {}: {}", id, reason),
            now,
        );
    }
}
