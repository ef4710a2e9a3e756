// src/handlers/session_handler.rs
use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::errors::CoordinatorResult;
use crate::models::{OfferView, ReservationId};
use crate::services::SessionSnapshot;
use crate::state::AppState;
use crate::utils::geo::LatLng;

/// `GET /session`: current derived state.
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

/// `GET /session/ws`: pushes a snapshot frame on every state change. The
/// first frame is the current state.
pub async fn session_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let snapshots = state.session.subscribe();
    ws.on_upgrade(move |socket| stream_snapshots(socket, snapshots))
}

async fn stream_snapshots(mut socket: WebSocket, mut snapshots: watch::Receiver<SessionSnapshot>) {
    if send_snapshot(&mut socket, &mut snapshots).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() || send_snapshot(&mut socket, &mut snapshots).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    tracing::debug!("Session stream closed");
}

async fn send_snapshot(
    socket: &mut WebSocket,
    snapshots: &mut watch::Receiver<SessionSnapshot>,
) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(&*snapshots.borrow_and_update());
    match frame {
        Ok(frame) => socket.send(Message::Text(frame)).await,
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize session snapshot");
            Ok(())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffersQuery {
    #[serde(default)]
    pub nearby_only: bool,
}

/// `GET /offers`: held offers, newest first. `nearbyOnly=true` hides the
/// ones flagged too far.
pub async fn list_offers(State(state): State<AppState>, Query(query): Query<OffersQuery>) -> Json<Vec<OfferView>> {
    let offers = state
        .session
        .snapshot()
        .offers
        .into_iter()
        .filter(|view| !query.nearby_only || !view.offer.too_far)
        .collect();
    Json(offers)
}

pub async fn go_online(State(state): State<AppState>) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.go_online().await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn go_offline(State(state): State<AppState>) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.go_offline().await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn accept_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.accept(ReservationId::from(id)).await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn reject_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.reject(ReservationId::from(id)).await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn select_pickup_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.select_pickup_trip(ReservationId::from(id)).await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn signal_arrival(State(state): State<AppState>) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.signal_arrival().await?;
    Ok(Json(state.session.snapshot()))
}

pub async fn confirm_passenger_pickup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.confirm_passenger_pickup(ReservationId::from(id)).await?;
    Ok(Json(state.session.snapshot()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTripResponse {
    pub reservation_ids: Vec<ReservationId>,
    pub session: SessionSnapshot,
}

pub async fn start_global_trip(State(state): State<AppState>) -> CoordinatorResult<Json<StartTripResponse>> {
    let reservation_ids = state.session.start_global_trip().await?;
    Ok(Json(StartTripResponse {
        reservation_ids,
        session: state.session.snapshot(),
    }))
}

pub async fn finish_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<Json<SessionSnapshot>> {
    state.session.finish_trip(ReservationId::from(id)).await?;
    Ok(Json(state.session.snapshot()))
}

/// `POST /location`: a GPS fix from the device.
pub async fn update_location(
    State(state): State<AppState>,
    Json(position): Json<LatLng>,
) -> CoordinatorResult<StatusCode> {
    state.geolocation.push(position)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn dismiss_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> CoordinatorResult<StatusCode> {
    state.session.dismiss_alert(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
