// src/services/session.rs
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OfflinePolicy;
use crate::errors::{CoordinatorError, CoordinatorResult};
use crate::models::{
    AcceptedTrip, AlertCenter, DailyCounters, DriverAlert, DriverStatus, OfferResponse, OfferView,
    OutboundEvent, PickupStatus, ReservationId, TripStep,
};
use crate::services::accepted_trips::AcceptedTripSet;
use crate::services::channel::RealtimeChannel;
use crate::services::offer_registry::OfferRegistry;
use crate::utils::geo::LatLng;

#[derive(Debug, Clone)]
pub struct TripSettings {
    pub max_offer_distance_km: f64,
    pub offer_countdown_secs: u32,
    pub countdown_tick: Duration,
    pub position_interval: Duration,
    pub offline_policy: OfflinePolicy,
    pub alert_ttl: Duration,
    pub default_location: LatLng,
}

impl Default for TripSettings {
    fn default() -> Self {
        Self {
            max_offer_distance_km: 5.0,
            offer_countdown_secs: 30,
            countdown_tick: Duration::from_secs(1),
            position_interval: Duration::from_secs(4),
            offline_policy: OfflinePolicy::Block,
            alert_ttl: Duration::from_secs(8),
            default_location: LatLng::new(9.6412, -13.5784),
        }
    }
}

/// Derived session state as the UI reads it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub is_online: bool,
    pub is_connecting: bool,
    pub status: DriverStatus,
    pub driver_location: LatLng,
    pub current_pickup_trip_id: Option<ReservationId>,
    pub trip_step: TripStep,
    pub offers: Vec<OfferView>,
    pub accepted_trips: Vec<AcceptedTrip>,
    pub counters: DailyCounters,
    pub alerts: Vec<DriverAlert>,
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// State of one driver's session: offers, accepted trips and the ride step.
///
/// Owned by a single task; every method runs to completion before the next
/// event is handled, so none of it needs locking.
pub struct DriverSession {
    pub(super) settings: TripSettings,
    pub(super) channel: Arc<dyn RealtimeChannel>,
    pub(super) is_online: bool,
    pub(super) is_connecting: bool,
    pub(super) driver_location: LatLng,
    pub(super) offers: OfferRegistry,
    pub(super) accepted: AcceptedTripSet,
    pub(super) current_pickup_trip_id: Option<ReservationId>,
    pub(super) trip_step: TripStep,
    pub(super) counters: DailyCounters,
    pub(super) alerts: AlertCenter,
    /// Accepted-set size the trip rooms were last joined for.
    pub(super) joined_rooms_for: Option<usize>,
}

impl DriverSession {
    pub fn new(settings: TripSettings, channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            driver_location: settings.default_location,
            alerts: AlertCenter::new(settings.alert_ttl),
            settings,
            channel,
            is_online: false,
            is_connecting: false,
            offers: OfferRegistry::new(),
            accepted: AcceptedTripSet::new(),
            current_pickup_trip_id: None,
            trip_step: TripStep::Idle,
            counters: DailyCounters::new(today()),
            joined_rooms_for: None,
        }
    }

    pub fn settings(&self) -> &TripSettings {
        &self.settings
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn is_connecting(&self) -> bool {
        self.is_connecting
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus::derive(self.is_online, self.trip_step)
    }

    pub fn trip_step(&self) -> TripStep {
        self.trip_step
    }

    pub fn current_pickup_trip_id(&self) -> Option<&ReservationId> {
        self.current_pickup_trip_id.as_ref()
    }

    pub fn driver_location(&self) -> LatLng {
        self.driver_location
    }

    pub fn offers(&self) -> &OfferRegistry {
        &self.offers
    }

    pub fn accepted(&self) -> &AcceptedTripSet {
        &self.accepted
    }

    pub fn counters(&self) -> &DailyCounters {
        &self.counters
    }

    pub fn alerts(&self) -> &AlertCenter {
        &self.alerts
    }

    /// Send an event; failures are logged, never retried.
    pub(super) fn emit(&self, event: OutboundEvent) {
        let name = event.name();
        match self.channel.emit(event) {
            Ok(()) => debug!(event = name, "Emitted realtime event"),
            Err(err) => error!(event = name, error = %err, "Failed to emit realtime event"),
        }
    }

    fn require_online(&self) -> CoordinatorResult<()> {
        if self.is_online {
            Ok(())
        } else {
            Err(CoordinatorError::NotOnline)
        }
    }

    fn step_to(&mut self, next: TripStep) -> CoordinatorResult<()> {
        if !self.trip_step.can_transition_to(next) {
            return Err(CoordinatorError::invalid_transition(self.trip_step, next));
        }
        debug!(from = %self.trip_step, to = %next, "Trip step changed");
        self.trip_step = next;
        Ok(())
    }

    /// Forced return to idle, outside the edge table.
    pub(super) fn reset_to_idle(&mut self) {
        self.current_pickup_trip_id = None;
        self.trip_step = TripStep::Idle;
    }

    /// Join the room of every accepted trip when going online or when the
    /// accepted set changed size. Joining is idempotent server-side.
    pub(super) fn sync_rooms(&mut self) {
        if !self.is_online || self.joined_rooms_for == Some(self.accepted.len()) {
            return;
        }
        for reservation_id in self.accepted.ids() {
            self.emit(OutboundEvent::JoinReservation { reservation_id });
        }
        self.joined_rooms_for = Some(self.accepted.len());
    }

    pub fn begin_connecting(&mut self) {
        self.is_connecting = true;
    }

    pub fn connection_failed(&mut self) {
        self.is_connecting = false;
    }

    /// Mark the session online at `location`, or at the default coordinate
    /// when the device has no fix.
    pub fn go_online(&mut self, location: Option<LatLng>) {
        self.is_connecting = false;
        self.is_online = true;
        self.driver_location = location
            .filter(LatLng::is_valid)
            .unwrap_or(self.settings.default_location);
        self.joined_rooms_for = None;
        info!(lat = self.driver_location.lat, lng = self.driver_location.lng, "Driver is online");
        self.sync_rooms();
    }

    /// The realtime link came back while online. Local state is kept and
    /// every room is joined again.
    pub fn connection_restored(&mut self) {
        self.is_connecting = false;
        self.joined_rooms_for = None;
        info!(accepted = self.accepted.len(), "Realtime connection restored");
        self.sync_rooms();
    }

    /// Hard reset: offers, accepted trips, dedup state and the step are all
    /// dropped. Refused while a trip is active unless the policy forces it.
    pub fn go_offline(&mut self) -> CoordinatorResult<()> {
        if self.trip_step.is_active() {
            match self.settings.offline_policy {
                OfflinePolicy::Block => return Err(CoordinatorError::TripInProgress),
                OfflinePolicy::ForceReset => {
                    warn!(step = %self.trip_step, "Going offline with an active trip; dropping it")
                }
            }
        }

        self.is_online = false;
        self.is_connecting = false;
        self.offers.clear();
        self.accepted.clear();
        self.reset_to_idle();
        self.joined_rooms_for = None;
        info!("Driver is offline");
        Ok(())
    }

    pub fn update_location(&mut self, location: LatLng) {
        if location.is_valid() {
            self.driver_location = location;
        }
    }

    pub fn accept(&mut self, id: &ReservationId) -> CoordinatorResult<()> {
        self.respond(id, OfferResponse::Accepting)
    }

    pub fn reject(&mut self, id: &ReservationId) -> CoordinatorResult<()> {
        self.respond(id, OfferResponse::Rejecting)
    }

    /// Removal waits for the server's confirmation. A second answer to the
    /// same offer is ignored.
    fn respond(&mut self, id: &ReservationId, response: OfferResponse) -> CoordinatorResult<()> {
        self.require_online()?;
        let offer = self
            .offers
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::offer_not_found(id))?;

        if let Some(previous) = offer.awaiting_response {
            debug!(reservation_id = %id, ?previous, "Offer already answered; ignoring");
            return Ok(());
        }
        offer.awaiting_response = Some(response);

        let reservation_id = id.clone();
        let event = match response {
            OfferResponse::Accepting => OutboundEvent::AcceptTrip { reservation_id },
            OfferResponse::Rejecting => OutboundEvent::RejectTrip { reservation_id },
        };
        info!(reservation_id = %id, ?response, "Answering trip offer");
        self.emit(event);
        Ok(())
    }

    /// Head to the pickup of an accepted trip.
    pub fn select_pickup_trip(&mut self, id: &ReservationId) -> CoordinatorResult<()> {
        self.require_online()?;
        let status = self
            .accepted
            .get(id)
            .map(|trip| trip.pickup_status)
            .ok_or_else(|| CoordinatorError::trip_not_found(id))?;
        if status == PickupStatus::PickedUp {
            return Err(CoordinatorError::PassengerAlreadyOnBoard(id.clone()));
        }

        self.step_to(TripStep::ToPickup)?;
        if let Some(trip) = self.accepted.get_mut(id) {
            trip.pickup_status = PickupStatus::Approaching;
        }
        self.current_pickup_trip_id = Some(id.clone());
        info!(reservation_id = %id, "Heading to pickup");
        self.emit(OutboundEvent::JoinTrip {
            reservation_id: id.clone(),
        });
        Ok(())
    }

    pub fn signal_arrival(&mut self) -> CoordinatorResult<()> {
        self.require_online()?;
        let id = self.current_pickup_trip_id.clone().ok_or(CoordinatorError::NoCurrentTrip)?;
        self.step_to(TripStep::AtPickup)?;
        if let Some(trip) = self.accepted.get_mut(&id) {
            trip.pickup_status = PickupStatus::Arrived;
        }
        info!(reservation_id = %id, "Arrived at pickup");
        self.emit(OutboundEvent::SignalArrival { reservation_id: id });
        Ok(())
    }

    /// Record a passenger on board. Several trips can reach this state before
    /// one combined start.
    pub fn confirm_passenger_pickup(&mut self, id: &ReservationId) -> CoordinatorResult<()> {
        self.require_online()?;
        let trip = self
            .accepted
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::trip_not_found(id))?;
        trip.pickup_status = PickupStatus::PickedUp;
        info!(reservation_id = %id, "Passenger picked up");

        if self.trip_step == TripStep::AtPickup {
            self.step_to(TripStep::ReadyToStart)?;
        }
        Ok(())
    }

    /// Start one ride for every passenger on board. Returns the batch.
    pub fn start_global_trip(&mut self) -> CoordinatorResult<Vec<ReservationId>> {
        self.require_online()?;
        let batch = self.accepted.picked_up_ids();
        let Some(first) = batch.first().cloned() else {
            return Err(CoordinatorError::EmptyPickupBatch);
        };

        self.step_to(TripStep::InProgress)?;
        // Position reports during the ride follow a passenger on board.
        if !self
            .current_pickup_trip_id
            .as_ref()
            .is_some_and(|current| batch.contains(current))
        {
            self.current_pickup_trip_id = Some(first);
        }
        info!(trips = batch.len(), "Starting ride");
        self.emit(OutboundEvent::StartTrips {
            reservation_ids: batch.clone(),
        });
        Ok(batch)
    }

    /// Drop off one passenger. Finishing the current trip while others are
    /// still on board hands "current" to the next of them and the ride stays
    /// `in_progress`; only the last drop-off clears the current trip and
    /// returns to `idle`.
    pub fn finish_trip(&mut self, id: &ReservationId) -> CoordinatorResult<()> {
        self.require_online()?;
        if !self.accepted.contains(id) {
            return Err(CoordinatorError::trip_not_found(id));
        }
        if self.trip_step != TripStep::InProgress {
            return Err(CoordinatorError::invalid_transition(self.trip_step, TripStep::Idle));
        }

        self.emit(OutboundEvent::FinishTrip {
            reservation_id: id.clone(),
        });
        self.accepted.remove(id);
        info!(reservation_id = %id, "Trip finished");

        if self.current_pickup_trip_id.as_ref() == Some(id) {
            match self.accepted.picked_up_ids().into_iter().next() {
                Some(next) => {
                    debug!(reservation_id = %next, "Next passenger on board becomes current");
                    self.current_pickup_trip_id = Some(next);
                }
                None => {
                    self.step_to(TripStep::Idle)?;
                    self.current_pickup_trip_id = None;
                }
            }
        }
        self.sync_rooms();
        Ok(())
    }

    /// Scheduler tick: expire offers and transient alerts.
    pub fn tick(&mut self, now: Instant) -> usize {
        let expired = self.offers.expire(now);
        for offer in &expired {
            debug!(reservation_id = %offer.id, "Trip offer expired");
        }
        self.alerts.prune(now);
        self.counters.roll_over(today());
        expired.len()
    }

    /// Trip the position reporter should tag updates with, if any.
    pub fn position_target(&self) -> Option<&ReservationId> {
        if self.is_online {
            self.current_pickup_trip_id.as_ref()
        } else {
            None
        }
    }

    pub fn report_position(&self) {
        if let Some(id) = self.position_target() {
            self.emit(OutboundEvent::PositionUpdate {
                reservation_id: id.clone(),
                lat: self.driver_location.lat,
                lng: self.driver_location.lng,
            });
        }
    }

    pub fn dismiss_alert(&mut self, id: Uuid) -> CoordinatorResult<()> {
        if self.alerts.dismiss(id) {
            Ok(())
        } else {
            Err(CoordinatorError::AlertNotFound(id.to_string()))
        }
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let mut counters = self.counters.clone();
        counters.roll_over(today());

        SessionSnapshot {
            is_online: self.is_online,
            is_connecting: self.is_connecting,
            status: self.status(),
            driver_location: self.driver_location,
            current_pickup_trip_id: self.current_pickup_trip_id.clone(),
            trip_step: self.trip_step,
            offers: self.offers.views(now),
            accepted_trips: self.accepted.iter().cloned().collect(),
            counters,
            alerts: self.alerts.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{AcceptConfirmation, InboundEvent, RawCoords, RawOffer, ReservationKeys};
    use crate::services::channel::RecordingChannel;

    pub(crate) fn online_session(settings: TripSettings) -> (DriverSession, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::connected());
        let mut session = DriverSession::new(settings, channel.clone());
        session.go_online(None);
        (session, channel)
    }

    pub(crate) fn offer_request(id: &str) -> InboundEvent {
        let mut raw = RawOffer::with_id(id);
        raw.pickup = Some(RawCoords::Point { lat: 9.6450, lng: -13.5800 });
        InboundEvent::OfferRequested(raw)
    }

    pub(crate) fn accept_confirmed(id: &str) -> InboundEvent {
        InboundEvent::AcceptConfirmed(AcceptConfirmation {
            ids: ReservationKeys::new(id),
            reservation: None,
        })
    }

    /// Offer, accept and confirm `ids`, leaving them as pending accepted trips.
    pub(crate) fn with_accepted(session: &mut DriverSession, ids: &[&str], now: Instant) {
        for id in ids {
            session.handle_inbound(offer_request(id), now);
            session.accept(&(*id).into()).unwrap();
            session.handle_inbound(accept_confirmed(id), now);
        }
    }

    fn pickup_status(session: &DriverSession, id: &str) -> PickupStatus {
        session.accepted().get(&id.into()).unwrap().pickup_status
    }

    #[test]
    fn test_accept_and_reject_are_sent_once() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        session.handle_inbound(offer_request("R1"), now);
        session.handle_inbound(offer_request("R2"), now);

        session.accept(&"R1".into()).unwrap();
        session.accept(&"R1".into()).unwrap();
        session.reject(&"R1".into()).unwrap();
        session.reject(&"R2".into()).unwrap();

        assert_eq!(
            channel.take_emitted(),
            vec![
                OutboundEvent::AcceptTrip { reservation_id: "R1".into() },
                OutboundEvent::RejectTrip { reservation_id: "R2".into() },
            ]
        );
        // Still held until the server confirms.
        assert_eq!(session.offers().len(), 2);
        assert!(matches!(
            session.accept(&"missing".into()),
            Err(CoordinatorError::OfferNotFound(_))
        ));
    }

    #[test]
    fn test_actions_require_online() {
        let channel = Arc::new(RecordingChannel::connected());
        let mut session = DriverSession::new(TripSettings::default(), channel.clone());
        assert!(matches!(session.signal_arrival(), Err(CoordinatorError::NotOnline)));
        assert!(matches!(session.start_global_trip(), Err(CoordinatorError::NotOnline)));
        assert!(channel.emitted().is_empty());
    }

    #[test]
    fn test_full_single_passenger_ride() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        channel.take_emitted();

        session.select_pickup_trip(&"A".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::ToPickup);
        assert_eq!(session.status(), DriverStatus::Busy);
        assert_eq!(pickup_status(&session, "A"), PickupStatus::Approaching);

        session.signal_arrival().unwrap();
        assert_eq!(session.trip_step(), TripStep::AtPickup);
        assert_eq!(pickup_status(&session, "A"), PickupStatus::Arrived);

        session.confirm_passenger_pickup(&"A".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::ReadyToStart);

        assert_eq!(session.start_global_trip().unwrap(), vec![ReservationId::new("A")]);
        assert_eq!(session.trip_step(), TripStep::InProgress);

        session.finish_trip(&"A".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::Idle);
        assert_eq!(session.current_pickup_trip_id(), None);
        assert_eq!(session.status(), DriverStatus::Available);
        assert!(session.accepted().is_empty());

        assert_eq!(
            channel.take_emitted(),
            vec![
                OutboundEvent::JoinTrip { reservation_id: "A".into() },
                OutboundEvent::SignalArrival { reservation_id: "A".into() },
                OutboundEvent::StartTrips { reservation_ids: vec!["A".into()] },
                OutboundEvent::FinishTrip { reservation_id: "A".into() },
            ]
        );
    }

    #[test]
    fn test_illegal_steps_are_rejected() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A", "B"], now);

        assert!(matches!(session.signal_arrival(), Err(CoordinatorError::NoCurrentTrip)));

        session.select_pickup_trip(&"A".into()).unwrap();
        assert!(matches!(
            session.select_pickup_trip(&"B".into()),
            Err(CoordinatorError::InvalidTransition { from: TripStep::ToPickup, to: TripStep::ToPickup })
        ));
        assert!(matches!(
            session.finish_trip(&"A".into()),
            Err(CoordinatorError::InvalidTransition { .. })
        ));
        assert_eq!(session.trip_step(), TripStep::ToPickup);
        assert_eq!(session.current_pickup_trip_id(), Some(&ReservationId::new("A")));
    }

    #[test]
    fn test_start_with_nobody_on_board_changes_nothing() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        session.select_pickup_trip(&"A".into()).unwrap();
        channel.take_emitted();

        assert!(matches!(session.start_global_trip(), Err(CoordinatorError::EmptyPickupBatch)));
        assert_eq!(session.trip_step(), TripStep::ToPickup);
        assert!(channel.emitted().is_empty());
    }

    #[test]
    fn test_pooled_passengers_start_together() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A", "B"], now);

        session.select_pickup_trip(&"A".into()).unwrap();
        session.signal_arrival().unwrap();
        session.confirm_passenger_pickup(&"A".into()).unwrap();

        session.select_pickup_trip(&"B".into()).unwrap();
        session.signal_arrival().unwrap();
        session.confirm_passenger_pickup(&"B".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::ReadyToStart);
        channel.take_emitted();

        let batch = session.start_global_trip().unwrap();
        assert_eq!(batch, vec![ReservationId::new("A"), ReservationId::new("B")]);
        assert_eq!(session.trip_step(), TripStep::InProgress);
        assert_eq!(
            channel.take_emitted(),
            vec![OutboundEvent::StartTrips { reservation_ids: vec!["A".into(), "B".into()] }]
        );

        // Dropping off the current passenger hands over to the other one.
        session.finish_trip(&"B".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::InProgress);
        assert_eq!(session.current_pickup_trip_id(), Some(&ReservationId::new("A")));

        session.finish_trip(&"A".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::Idle);
        assert_eq!(session.current_pickup_trip_id(), None);
    }

    #[test]
    fn test_confirm_pickup_without_arrival_only_marks_trip() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A", "B"], now);

        session.confirm_passenger_pickup(&"B".into()).unwrap();
        assert_eq!(pickup_status(&session, "B"), PickupStatus::PickedUp);
        assert_eq!(session.trip_step(), TripStep::Idle);
        assert!(matches!(
            session.select_pickup_trip(&"B".into()),
            Err(CoordinatorError::PassengerAlreadyOnBoard(_))
        ));

        // Started straight from idle: the batch head becomes current.
        session.start_global_trip().unwrap();
        assert_eq!(session.current_pickup_trip_id(), Some(&ReservationId::new("B")));
    }

    #[test]
    fn test_start_while_heading_to_another_pickup_follows_the_batch() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A", "B"], now);

        session.confirm_passenger_pickup(&"A".into()).unwrap();
        session.select_pickup_trip(&"B".into()).unwrap();
        assert_eq!(session.trip_step(), TripStep::ToPickup);

        let batch = session.start_global_trip().unwrap();
        assert_eq!(batch, vec![ReservationId::new("A")]);
        assert_eq!(session.trip_step(), TripStep::InProgress);
        assert_eq!(session.current_pickup_trip_id(), Some(&ReservationId::new("A")));
        assert_eq!(session.position_target(), Some(&ReservationId::new("A")));
    }

    #[test]
    fn test_going_offline_clears_everything() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        session.handle_inbound(offer_request("R1"), now);
        session.handle_inbound(offer_request("R2"), now);
        assert_eq!(session.offers().len(), 2);
        assert_eq!(session.accepted().len(), 1);

        session.go_offline().unwrap();
        assert!(session.offers().is_empty());
        assert!(session.accepted().is_empty());
        assert!(!session.offers().is_seen(&"R1".into()));
        assert_eq!(session.trip_step(), TripStep::Idle);
        assert_eq!(session.status(), DriverStatus::Offline);
    }

    #[test]
    fn test_going_offline_mid_trip_follows_policy() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        session.select_pickup_trip(&"A".into()).unwrap();

        assert!(matches!(session.go_offline(), Err(CoordinatorError::TripInProgress)));
        assert!(session.is_online());
        assert_eq!(session.accepted().len(), 1);

        let settings = TripSettings {
            offline_policy: OfflinePolicy::ForceReset,
            ..TripSettings::default()
        };
        let (mut session, _channel) = online_session(settings);
        with_accepted(&mut session, &["A"], now);
        session.select_pickup_trip(&"A".into()).unwrap();

        session.go_offline().unwrap();
        assert_eq!(session.status(), DriverStatus::Offline);
        assert_eq!(session.current_pickup_trip_id(), None);
        assert!(session.accepted().is_empty());
    }

    #[test]
    fn test_rooms_rejoined_when_online_or_set_size_changes() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        let joins = |events: Vec<OutboundEvent>| {
            events
                .into_iter()
                .filter(|e| matches!(e, OutboundEvent::JoinReservation { .. }))
                .count()
        };
        assert_eq!(joins(channel.take_emitted()), 1);

        with_accepted(&mut session, &["B"], now);
        assert_eq!(joins(channel.take_emitted()), 2);

        // Same size: nothing to rejoin.
        session.sync_rooms();
        assert!(channel.take_emitted().is_empty());

        session.go_online(None);
        assert_eq!(joins(channel.take_emitted()), 2);
    }

    #[test]
    fn test_position_reported_only_for_current_trip() {
        let now = Instant::now();
        let (mut session, channel) = online_session(TripSettings::default());
        with_accepted(&mut session, &["A"], now);
        channel.take_emitted();

        session.report_position();
        assert!(channel.emitted().is_empty());
        assert_eq!(session.position_target(), None);

        session.select_pickup_trip(&"A".into()).unwrap();
        session.update_location(LatLng::new(9.65, -13.58));
        channel.take_emitted();
        session.report_position();
        assert_eq!(
            channel.take_emitted(),
            vec![OutboundEvent::PositionUpdate { reservation_id: "A".into(), lat: 9.65, lng: -13.58 }]
        );
    }

    #[test]
    fn test_location_falls_back_to_default() {
        let settings = TripSettings::default();
        let default_location = settings.default_location;
        let (session, _channel) = online_session(settings);
        assert_eq!(session.driver_location(), default_location);

        let mut session = session;
        session.update_location(LatLng::new(f64::NAN, 0.0));
        assert_eq!(session.driver_location(), default_location);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        session.handle_inbound(offer_request("R1"), now);

        let snapshot = session.snapshot(now + Duration::from_secs(10));
        assert!(snapshot.is_online);
        assert_eq!(snapshot.status, DriverStatus::Available);
        assert_eq!(snapshot.offers.len(), 1);
        assert_eq!(snapshot.offers[0].expires_in, 20);
        assert_eq!(snapshot.counters.requested, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["tripStep"], "idle");
        assert_eq!(json["offers"][0]["id"], "R1");
        assert_eq!(json["offers"][0]["expiresIn"], 20);
        assert_eq!(json["offers"][0]["tooFar"], false);
    }

    #[test]
    fn test_tick_expires_offers() {
        let now = Instant::now();
        let (mut session, _channel) = online_session(TripSettings::default());
        session.handle_inbound(offer_request("R1"), now);

        assert_eq!(session.tick(now + Duration::from_secs(29)), 0);
        assert_eq!(session.tick(now + Duration::from_secs(30)), 1);
        assert!(session.offers().is_empty());
    }
}
