//! Realtime wire messages.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}`.
//! The socket.io-style array form `["<name>", {...}]` is accepted inbound
//! as well. Event names are mapped onto closed enums here so the rest of
//! the crate never matches on strings.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::offer::{lenient, PassengerInfo, RawOffer, ReservationId, ReservationKeys};

/// Events the driver session sends to the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "course:accepter", rename_all = "camelCase")]
    AcceptTrip { reservation_id: ReservationId },

    #[serde(rename = "course:refuser", rename_all = "camelCase")]
    RejectTrip { reservation_id: ReservationId },

    #[serde(rename = "course:rejoindre", rename_all = "camelCase")]
    JoinTrip { reservation_id: ReservationId },

    #[serde(rename = "course:signaler_arrivee", rename_all = "camelCase")]
    SignalArrival { reservation_id: ReservationId },

    #[serde(rename = "course:demarrer_global", rename_all = "camelCase")]
    StartTrips { reservation_ids: Vec<ReservationId> },

    #[serde(rename = "course:terminer", rename_all = "camelCase")]
    FinishTrip { reservation_id: ReservationId },

    #[serde(rename = "position:update", rename_all = "camelCase")]
    PositionUpdate {
        reservation_id: ReservationId,
        lat: f64,
        lng: f64,
    },

    #[serde(rename = "reservation:join", rename_all = "camelCase")]
    JoinReservation { reservation_id: ReservationId },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::AcceptTrip { .. } => "course:accepter",
            OutboundEvent::RejectTrip { .. } => "course:refuser",
            OutboundEvent::JoinTrip { .. } => "course:rejoindre",
            OutboundEvent::SignalArrival { .. } => "course:signaler_arrivee",
            OutboundEvent::StartTrips { .. } => "course:demarrer_global",
            OutboundEvent::FinishTrip { .. } => "course:terminer",
            OutboundEvent::PositionUpdate { .. } => "position:update",
            OutboundEvent::JoinReservation { .. } => "reservation:join",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload that only names a reservation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationRef {
    #[serde(flatten)]
    pub ids: ReservationKeys,
}

impl ReservationRef {
    pub fn reservation_id(&self) -> Option<&ReservationId> {
        self.ids.get()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptConfirmation {
    #[serde(flatten)]
    pub ids: ReservationKeys,
    /// Some servers echo the full reservation back.
    #[serde(default, deserialize_with = "lenient")]
    pub reservation: Option<RawOffer>,
}

impl AcceptConfirmation {
    pub fn id(&self) -> Option<&ReservationId> {
        self.ids
            .get()
            .or_else(|| self.reservation.as_ref().and_then(|r| r.ids.get()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancellationNotice {
    #[serde(flatten)]
    pub ids: ReservationKeys,
    #[serde(alias = "raison", alias = "motif", default, deserialize_with = "lenient")]
    pub reason: Option<String>,
    #[serde(alias = "client", alias = "passager", default, deserialize_with = "lenient")]
    pub passenger: Option<PassengerInfo>,
}

impl CancellationNotice {
    pub fn reservation_id(&self) -> Option<&ReservationId> {
        self.ids.get()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomRefusal {
    #[serde(flatten)]
    pub ids: ReservationKeys,
    #[serde(alias = "message", default, deserialize_with = "lenient")]
    pub reason: Option<String>,
}

impl RoomRefusal {
    pub fn reservation_id(&self) -> Option<&ReservationId> {
        self.ids.get()
    }
}

/// Events pushed by the realtime server.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    OfferRequested(RawOffer),
    AcceptConfirmed(AcceptConfirmation),
    AlreadyTaken(ReservationRef),
    RejectConfirmed(ReservationRef),
    /// Both `course:annulee` and `trip_cancelled`.
    TripCancelled(CancellationNotice),
    RoomJoined(ReservationRef),
    RoomJoinRefused(RoomRefusal),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("invalid payload for {event}: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Object {
        event: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    Tuple(String, serde_json::Value),
}

impl InboundEvent {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;
        let (event, data) = match envelope {
            Envelope::Object { event, data } => (event, data),
            Envelope::Tuple(event, data) => (event, data),
        };
        Self::from_parts(&event, data)
    }

    pub fn from_parts(event: &str, data: serde_json::Value) -> Result<Self, DecodeError> {
        match event {
            "course:demande" => Ok(Self::OfferRequested(payload(event, data)?)),
            "course:acceptee_confirmation" => Ok(Self::AcceptConfirmed(payload(event, data)?)),
            "course:deja_prise" => Ok(Self::AlreadyTaken(payload(event, data)?)),
            "course:refusee_confirmation" => Ok(Self::RejectConfirmed(payload(event, data)?)),
            "course:annulee" | "trip_cancelled" => Ok(Self::TripCancelled(payload(event, data)?)),
            "reservation:join:ok" => Ok(Self::RoomJoined(payload(event, data)?)),
            "reservation:join:refused" => Ok(Self::RoomJoinRefused(payload(event, data)?)),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::OfferRequested(_) => "course:demande",
            InboundEvent::AcceptConfirmed(_) => "course:acceptee_confirmation",
            InboundEvent::AlreadyTaken(_) => "course:deja_prise",
            InboundEvent::RejectConfirmed(_) => "course:refusee_confirmation",
            InboundEvent::TripCancelled(_) => "course:annulee",
            InboundEvent::RoomJoined(_) => "reservation:join:ok",
            InboundEvent::RoomJoinRefused(_) => "reservation:join:refused",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        event: event.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_format() {
        let event = OutboundEvent::AcceptTrip { reservation_id: "R1".into() };
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value, json!({ "event": "course:accepter", "data": { "reservationId": "R1" } }));

        let batch = OutboundEvent::StartTrips { reservation_ids: vec!["A".into(), "B".into()] };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({ "event": "course:demarrer_global", "data": { "reservationIds": ["A", "B"] } })
        );

        let position = OutboundEvent::PositionUpdate { reservation_id: "A".into(), lat: 9.6, lng: -13.5 };
        assert_eq!(
            serde_json::to_value(&position).unwrap(),
            json!({ "event": "position:update", "data": { "reservationId": "A", "lat": 9.6, "lng": -13.5 } })
        );
        assert_eq!(position.name(), "position:update");
    }

    #[test]
    fn test_cancellation_aliases_decode_to_one_variant() {
        let first = InboundEvent::decode(r#"{"event":"course:annulee","data":{"reservationId":"R9"}}"#).unwrap();
        let second = InboundEvent::decode(r#"{"event":"trip_cancelled","data":{"id":9}}"#).unwrap();

        match (first, second) {
            (InboundEvent::TripCancelled(a), InboundEvent::TripCancelled(b)) => {
                assert_eq!(a.reservation_id(), Some(&"R9".into()));
                assert_eq!(b.reservation_id(), Some(&"9".into()));
            }
            other => panic!("expected two cancellations, got {:?}", other),
        }
    }

    #[test]
    fn test_tuple_envelope() {
        let event = InboundEvent::decode(r#"["course:deja_prise", {"reservationId": "R1"}]"#).unwrap();
        match event {
            InboundEvent::AlreadyTaken(reference) => {
                assert_eq!(reference.reservation_id().map(ReservationId::as_str), Some("R1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_accept_confirmation_id_falls_back_to_reservation() {
        let event = InboundEvent::from_parts(
            "course:acceptee_confirmation",
            json!({ "reservation": { "_id": "R5", "pickup": { "lat": 9.6, "lng": -13.6 } } }),
        )
        .unwrap();
        match event {
            InboundEvent::AcceptConfirmed(confirmation) => {
                assert_eq!(confirmation.id().map(ReservationId::as_str), Some("R5"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(InboundEvent::decode("not json"), Err(DecodeError::Envelope(_))));
        assert!(matches!(
            InboundEvent::decode(r#"{"event":"course:inconnue","data":{}}"#),
            Err(DecodeError::UnknownEvent(name)) if name == "course:inconnue"
        ));
        assert!(matches!(
            InboundEvent::decode(r#"{"event":"course:demande","data":"oops"}"#),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn test_missing_id_still_decodes() {
        let event = InboundEvent::decode(r#"{"event":"course:refusee_confirmation","data":{}}"#).unwrap();
        assert!(matches!(event, InboundEvent::RejectConfirmed(ref reference) if reference.reservation_id().is_none()));
    }

    #[test]
    fn test_payloads_carrying_several_id_keys() {
        let cancelled =
            InboundEvent::decode(r#"{"event":"course:annulee","data":{"reservationId":"A","_id":"A"}}"#).unwrap();
        match cancelled {
            InboundEvent::TripCancelled(notice) => assert_eq!(notice.reservation_id(), Some(&"A".into())),
            other => panic!("unexpected event {:?}", other),
        }

        let requested = InboundEvent::decode(
            r#"{"event":"course:demande","data":{"reservationId":"A","_id":"A","id":"A","depart":[9.64,-13.57]}}"#,
        )
        .unwrap();
        match requested {
            InboundEvent::OfferRequested(raw) => {
                assert_eq!(raw.ids.get(), Some(&"A".into()));
                assert!(raw.pickup.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_malformed_offer_fields_keep_the_event() {
        let event = InboundEvent::decode(
            r#"{"event":"course:demande","data":{"reservationId":"R2","depart":"Kaloum","countdown":30.5}}"#,
        )
        .unwrap();
        match event {
            InboundEvent::OfferRequested(raw) => {
                assert!(raw.pickup.is_none());
                assert_eq!(raw.expires_in, Some(31));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
