// src/services/runtime.rs
//! The session task.
//!
//! One task owns the [`DriverSession`] and handles commands, inbound
//! realtime events and timer ticks one at a time. The UI side talks to it
//! through a cloneable [`SessionHandle`] and reads state from a `watch` of
//! [`SessionSnapshot`].

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{CoordinatorError, CoordinatorResult};
use crate::models::{InboundEvent, ReservationId};
use crate::services::channel::{InboundReceiver, RealtimeChannel};
use crate::services::position_reporter::PositionReporter;
use crate::services::providers::{GeolocationProvider, IdentityProvider};
use crate::services::session::{DriverSession, SessionSnapshot, TripSettings};
use crate::utils::geo::LatLng;

const COMMAND_BUFFER: usize = 64;
const TIMER_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    Countdown,
    Position,
}

/// Spawn a task that posts `tick` every `period`, starting one period from
/// now. Abort the handle to stop it.
pub fn spawn_ticker(period: Duration, tick: TimerTick, ticks: mpsc::Sender<TimerTick>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            if ticks.send(tick).await.is_err() {
                break;
            }
        }
    })
}

type Reply<T> = oneshot::Sender<CoordinatorResult<T>>;

enum SessionCommand {
    GoOnline(Reply<()>),
    GoOffline(Reply<()>),
    Accept(ReservationId, Reply<()>),
    Reject(ReservationId, Reply<()>),
    SelectPickup(ReservationId, Reply<()>),
    SignalArrival(Reply<()>),
    ConfirmPickup(ReservationId, Reply<()>),
    StartTrip(Reply<Vec<ReservationId>>),
    FinishTrip(ReservationId, Reply<()>),
    DismissAlert(Uuid, Reply<()>),
}

/// Cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> SessionCommand) -> CoordinatorResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CoordinatorError::SessionUnavailable)?;
        response.await.map_err(|_| CoordinatorError::SessionUnavailable)?
    }

    pub async fn go_online(&self) -> CoordinatorResult<()> {
        self.request(SessionCommand::GoOnline).await
    }

    pub async fn go_offline(&self) -> CoordinatorResult<()> {
        self.request(SessionCommand::GoOffline).await
    }

    pub async fn accept(&self, id: ReservationId) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::Accept(id, reply)).await
    }

    pub async fn reject(&self, id: ReservationId) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::Reject(id, reply)).await
    }

    pub async fn select_pickup_trip(&self, id: ReservationId) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::SelectPickup(id, reply)).await
    }

    pub async fn signal_arrival(&self) -> CoordinatorResult<()> {
        self.request(SessionCommand::SignalArrival).await
    }

    pub async fn confirm_passenger_pickup(&self, id: ReservationId) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::ConfirmPickup(id, reply)).await
    }

    pub async fn start_global_trip(&self) -> CoordinatorResult<Vec<ReservationId>> {
        self.request(SessionCommand::StartTrip).await
    }

    pub async fn finish_trip(&self, id: ReservationId) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::FinishTrip(id, reply)).await
    }

    pub async fn dismiss_alert(&self, id: Uuid) -> CoordinatorResult<()> {
        self.request(|reply| SessionCommand::DismissAlert(id, reply)).await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Resolves to the next inbound event, or stays pending while disconnected.
async fn recv_inbound(inbound: &mut Option<InboundReceiver>) -> Option<InboundEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub struct SessionRuntime {
    session: DriverSession,
    channel: Arc<dyn RealtimeChannel>,
    identity: Arc<dyn IdentityProvider>,
    geolocation: Arc<dyn GeolocationProvider>,
    commands_rx: mpsc::Receiver<SessionCommand>,
    inbound_rx: Option<InboundReceiver>,
    timers_tx: mpsc::Sender<TimerTick>,
    timers_rx: mpsc::Receiver<TimerTick>,
    location_rx: watch::Receiver<Option<LatLng>>,
    location_open: bool,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    countdown: Option<JoinHandle<()>>,
    position: PositionReporter,
}

impl SessionRuntime {
    pub fn new(
        settings: TripSettings,
        channel: Arc<dyn RealtimeChannel>,
        identity: Arc<dyn IdentityProvider>,
        geolocation: Arc<dyn GeolocationProvider>,
    ) -> (Self, SessionHandle) {
        let position = PositionReporter::new(settings.position_interval);
        let session = DriverSession::new(settings, channel.clone());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (timers_tx, timers_rx) = mpsc::channel(TIMER_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot(now()));
        let location_rx = geolocation.watch_position();

        let runtime = Self {
            session,
            channel,
            identity,
            geolocation,
            commands_rx,
            inbound_rx: None,
            timers_tx,
            timers_rx,
            location_rx,
            location_open: true,
            snapshot_tx,
            countdown: None,
            position,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
        };
        (runtime, handle)
    }

    /// Process events until `shutdown_rx` flips to true or its sender drops.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Driver session started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Driver session received shutdown signal");
                        break;
                    }
                }

                event = recv_inbound(&mut self.inbound_rx) => match event {
                    Some(event) => self.session.handle_inbound(event, now()),
                    None => {
                        warn!("Realtime connection closed by the server");
                        self.inbound_rx = None;
                    }
                },

                Some(command) = self.commands_rx.recv() => self.handle_command(command).await,

                Some(tick) = self.timers_rx.recv() => self.handle_tick(tick),

                changed = self.location_rx.changed(), if self.location_open => {
                    if changed.is_err() {
                        debug!("Geolocation source closed");
                        self.location_open = false;
                    } else if let Some(location) = *self.location_rx.borrow_and_update() {
                        self.session.update_location(location);
                    }
                }
            }

            self.settle();
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::GoOnline(reply) => {
                let result = self.go_online().await;
                self.respond(reply, result);
            }
            SessionCommand::GoOffline(reply) => {
                let result = self.go_offline().await;
                self.respond(reply, result);
            }
            SessionCommand::Accept(id, reply) => {
                let result = self.session.accept(&id);
                self.respond(reply, result);
            }
            SessionCommand::Reject(id, reply) => {
                let result = self.session.reject(&id);
                self.respond(reply, result);
            }
            SessionCommand::SelectPickup(id, reply) => {
                let result = self.session.select_pickup_trip(&id);
                self.respond(reply, result);
            }
            SessionCommand::SignalArrival(reply) => {
                let result = self.session.signal_arrival();
                self.respond(reply, result);
            }
            SessionCommand::ConfirmPickup(id, reply) => {
                let result = self.session.confirm_passenger_pickup(&id);
                self.respond(reply, result);
            }
            SessionCommand::StartTrip(reply) => {
                let result = self.session.start_global_trip();
                self.respond(reply, result);
            }
            SessionCommand::FinishTrip(id, reply) => {
                let result = self.session.finish_trip(&id);
                self.respond(reply, result);
            }
            SessionCommand::DismissAlert(id, reply) => {
                let result = self.session.dismiss_alert(id);
                self.respond(reply, result);
            }
        }
    }

    /// Publish the new state before the caller sees the result.
    fn respond<T>(&mut self, reply: Reply<T>, result: CoordinatorResult<T>) {
        self.settle();
        if reply.send(result).is_err() {
            debug!("Command caller went away before the reply");
        }
    }

    fn handle_tick(&mut self, tick: TimerTick) {
        match tick {
            TimerTick::Countdown => {
                let expired = self.session.tick(now());
                if expired > 0 {
                    debug!(expired, "Expired trip offers");
                }
            }
            TimerTick::Position => self.session.report_position(),
        }
    }

    /// Connect and go online. When already online but the realtime link was
    /// lost, reconnect and keep the local trips.
    async fn go_online(&mut self) -> CoordinatorResult<()> {
        let reconnecting = self.session.is_online();
        if reconnecting && self.inbound_rx.is_some() && self.channel.is_connected() {
            return Ok(());
        }
        let identity = self
            .identity
            .current_driver()
            .ok_or(CoordinatorError::MissingIdentity)?;

        self.session.begin_connecting();
        self.publish();
        info!(driver_id = %identity.driver_id, reconnecting, "Connecting to realtime server");

        let inbound = match self.channel.connect(&identity).await {
            Ok(inbound) => inbound,
            Err(err) => {
                error!(error = %err, "Failed to connect to realtime server");
                self.session.connection_failed();
                return Err(err.into());
            }
        };

        if reconnecting {
            self.inbound_rx = Some(inbound);
            self.session.connection_restored();
            return Ok(());
        }

        let location = match self.geolocation.current_position().await {
            Ok(location) => Some(location),
            Err(err) => {
                warn!(error = %err, "No device position; using default location");
                None
            }
        };

        self.inbound_rx = Some(inbound);
        self.session.go_online(location);
        Ok(())
    }

    async fn go_offline(&mut self) -> CoordinatorResult<()> {
        self.session.go_offline()?;
        self.inbound_rx = None;
        self.channel.disconnect().await;
        Ok(())
    }

    /// Countdown runs while online; the position timer while there is a
    /// trip to report for.
    fn sync_timers(&mut self) {
        match (self.session.is_online(), &self.countdown) {
            (true, None) => {
                let period = self.session.settings().countdown_tick;
                self.countdown = Some(spawn_ticker(period, TimerTick::Countdown, self.timers_tx.clone()));
                debug!("Offer countdown started");
            }
            (false, Some(_)) => {
                if let Some(handle) = self.countdown.take() {
                    handle.abort();
                }
                debug!("Offer countdown stopped");
            }
            _ => {}
        }
        self.position.sync(self.session.position_target(), &self.timers_tx);
    }

    fn settle(&mut self) {
        self.sync_timers();
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot(now()));
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
        self.position.stop();
        self.inbound_rx = None;
        self.channel.disconnect().await;
        info!("Driver session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflinePolicy;
    use crate::models::{DriverIdentity, DriverStatus, OutboundEvent, TripStep};
    use crate::services::channel::RecordingChannel;
    use crate::services::providers::{DeviceGeolocation, StaticIdentity};
    use serde_json::json;

    struct Harness {
        handle: SessionHandle,
        channel: Arc<RecordingChannel>,
        geolocation: Arc<DeviceGeolocation>,
        shutdown_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    }

    fn start(settings: TripSettings, identity: Option<DriverIdentity>) -> Harness {
        let channel = Arc::new(RecordingChannel::new());
        let geolocation = Arc::new(DeviceGeolocation::new());
        let (runtime, handle) = SessionRuntime::new(
            settings,
            channel.clone(),
            Arc::new(StaticIdentity::new(identity)),
            geolocation.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(runtime.run(shutdown_rx));
        Harness {
            handle,
            channel,
            geolocation,
            shutdown_tx,
            task,
        }
    }

    fn driver() -> Option<DriverIdentity> {
        Some(DriverIdentity::new("drv-1"))
    }

    fn inbound(event: &str, data: serde_json::Value) -> InboundEvent {
        InboundEvent::from_parts(event, data).unwrap()
    }

    async fn wait_for(handle: &SessionHandle, check: impl FnMut(&SessionSnapshot) -> bool) {
        let mut snapshots = handle.subscribe();
        snapshots.wait_for(check).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_online_requires_identity() {
        let harness = start(TripSettings::default(), None);
        let result = harness.handle.go_online().await;
        assert!(matches!(result, Err(CoordinatorError::MissingIdentity)));
        assert!(!harness.handle.snapshot().is_online);
        assert_eq!(harness.channel.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_uses_device_position_and_follows_updates() {
        let harness = start(TripSettings::default(), driver());
        harness.geolocation.push(LatLng::new(9.60, -13.60)).unwrap();

        harness.handle.go_online().await.unwrap();
        let snapshot = harness.handle.snapshot();
        assert!(snapshot.is_online);
        assert!(!snapshot.is_connecting);
        assert_eq!(snapshot.status, DriverStatus::Available);
        assert_eq!(snapshot.driver_location, LatLng::new(9.60, -13.60));

        harness.geolocation.push(LatLng::new(9.61, -13.61)).unwrap();
        wait_for(&harness.handle, |s| s.driver_location == LatLng::new(9.61, -13.61)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_counts_down_and_expires() {
        let harness = start(TripSettings::default(), driver());
        harness.handle.go_online().await.unwrap();

        assert!(harness.channel.inject(inbound(
            "course:demande",
            json!({ "reservationId": "R1", "countdown": 3, "pickup": { "lat": 9.645, "lng": -13.58 } }),
        )));
        wait_for(&harness.handle, |s| s.offers.len() == 1).await;
        assert_eq!(harness.handle.snapshot().offers[0].expires_in, 3);

        wait_for(&harness.handle, |s| s.offers.first().is_some_and(|o| o.expires_in == 1)).await;
        wait_for(&harness.handle, |s| s.offers.is_empty()).await;
        assert_eq!(harness.handle.snapshot().counters.requested, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ride_through_handle_reports_position() {
        let harness = start(TripSettings::default(), driver());
        let handle = &harness.handle;
        handle.go_online().await.unwrap();

        harness.channel.inject(inbound("course:demande", json!({ "reservationId": "A" })));
        wait_for(handle, |s| s.offers.len() == 1).await;
        handle.accept("A".into()).await.unwrap();
        harness
            .channel
            .inject(inbound("course:acceptee_confirmation", json!({ "reservationId": "A" })));
        wait_for(handle, |s| s.accepted_trips.len() == 1).await;

        handle.select_pickup_trip("A".into()).await.unwrap();
        assert_eq!(handle.snapshot().trip_step, TripStep::ToPickup);
        assert!(matches!(handle.go_offline().await, Err(CoordinatorError::TripInProgress)));

        harness.channel.take_emitted();
        tokio::time::sleep(Duration::from_secs(9)).await;
        let reports = harness
            .channel
            .take_emitted()
            .into_iter()
            .filter(|e| matches!(e, OutboundEvent::PositionUpdate { .. }))
            .count();
        assert_eq!(reports, 2);

        handle.signal_arrival().await.unwrap();
        handle.confirm_passenger_pickup("A".into()).await.unwrap();
        assert_eq!(handle.start_global_trip().await.unwrap(), vec![ReservationId::new("A")]);
        handle.finish_trip("A".into()).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.trip_step, TripStep::Idle);
        assert!(snapshot.accepted_trips.is_empty());

        // Idle again: no more position traffic.
        harness.channel.take_emitted();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(
            harness
                .channel
                .emitted()
                .iter()
                .all(|e| !matches!(e, OutboundEvent::PositionUpdate { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_offline_disconnects_and_clears() {
        let settings = TripSettings {
            offline_policy: OfflinePolicy::ForceReset,
            ..TripSettings::default()
        };
        let harness = start(settings, driver());
        let handle = &harness.handle;
        handle.go_online().await.unwrap();

        harness.channel.inject(inbound("course:demande", json!({ "reservationId": "A" })));
        harness.channel.inject(inbound("course:demande", json!({ "reservationId": "B" })));
        wait_for(handle, |s| s.offers.len() == 2).await;

        handle.go_offline().await.unwrap();
        let snapshot = handle.snapshot();
        assert!(!snapshot.is_online);
        assert_eq!(snapshot.status, DriverStatus::Offline);
        assert!(snapshot.offers.is_empty());
        assert!(!harness.channel.is_connected());

        // Offline actions fail cleanly.
        assert!(matches!(handle.signal_arrival().await, Err(CoordinatorError::NotOnline)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_leaves_session_offline() {
        let channel = Arc::new(RecordingChannel::failing());
        let (runtime, handle) = SessionRuntime::new(
            TripSettings::default(),
            channel.clone(),
            Arc::new(StaticIdentity::new(driver())),
            Arc::new(DeviceGeolocation::new()),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(runtime.run(shutdown_rx));

        assert!(matches!(handle.go_online().await, Err(CoordinatorError::Channel(_))));
        let snapshot = handle.snapshot();
        assert!(!snapshot.is_online);
        assert!(!snapshot.is_connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_online_reconnects_after_server_closed_the_link() {
        let harness = start(TripSettings::default(), driver());
        let handle = &harness.handle;
        handle.go_online().await.unwrap();
        handle.go_online().await.unwrap();
        assert_eq!(harness.channel.connect_calls(), 1);

        harness.channel.inject(inbound("course:demande", json!({ "reservationId": "A" })));
        wait_for(handle, |s| s.offers.len() == 1).await;
        handle.accept("A".into()).await.unwrap();
        harness
            .channel
            .inject(inbound("course:acceptee_confirmation", json!({ "reservationId": "A" })));
        wait_for(handle, |s| s.accepted_trips.len() == 1).await;
        handle.select_pickup_trip("A".into()).await.unwrap();

        harness.channel.drop_connection();
        assert!(matches!(handle.go_offline().await, Err(CoordinatorError::TripInProgress)));
        harness.channel.take_emitted();

        handle.go_online().await.unwrap();
        assert_eq!(harness.channel.connect_calls(), 2);
        let snapshot = handle.snapshot();
        assert!(snapshot.is_online);
        assert!(!snapshot.is_connecting);
        assert_eq!(snapshot.trip_step, TripStep::ToPickup);
        assert_eq!(snapshot.accepted_trips.len(), 1);
        assert!(
            harness
                .channel
                .emitted()
                .contains(&OutboundEvent::JoinReservation { reservation_id: "A".into() })
        );

        // Server events reach the session again.
        assert!(harness.channel.inject(inbound("course:annulee", json!({ "reservationId": "A" }))));
        wait_for(handle, |s| s.trip_step == TripStep::Idle && s.accepted_trips.is_empty()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_session() {
        let harness = start(TripSettings::default(), driver());
        harness.handle.go_online().await.unwrap();

        harness.shutdown_tx.send(true).unwrap();
        harness.task.await.unwrap();

        assert!(!harness.channel.is_connected());
        assert!(matches!(
            harness.handle.go_online().await,
            Err(CoordinatorError::SessionUnavailable)
        ));
    }
}
