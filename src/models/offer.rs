// src/models/offer.rs
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::utils::geo::{normalize_coords, LatLng};

/// Identifier of a reservation as the realtime server knows it.
///
/// The server is not consistent about sending ids as strings or numbers, so
/// both `42` and `"42"` deserialize to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReservationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ReservationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for ReservationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(de::Error::custom("empty reservation id"));
                }
                Ok(Self(trimmed.to_string()))
            }
            RawId::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

/// Reads an optional payload field without failing the whole payload: a
/// value of the wrong shape is logged and treated as absent.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            warn!(error = %err, "Ignoring malformed payload field");
            Ok(None)
        }
    }
}

/// Countdown seconds sent as an integer, a float (rounded up) or a numeric string.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let secs = match &value {
        Value::Null => return Ok(None),
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match secs.filter(|secs| secs.is_finite() && *secs > 0.0) {
        Some(secs) => Ok(Some(secs.ceil().min(f64::from(u32::MAX)) as u32)),
        None => {
            warn!(%value, "Ignoring malformed offer countdown");
            Ok(None)
        }
    }
}

/// Identifier keys of a payload. Producers send any of `reservationId`,
/// `id` and `_id`, often more than one, so each is read on its own.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReservationKeys {
    #[serde(rename = "reservationId", default, deserialize_with = "lenient")]
    reservation_id: Option<ReservationId>,
    #[serde(default, deserialize_with = "lenient")]
    id: Option<ReservationId>,
    #[serde(rename = "_id", default, deserialize_with = "lenient")]
    mongo_id: Option<ReservationId>,
}

impl ReservationKeys {
    pub fn new(id: impl Into<ReservationId>) -> Self {
        Self {
            reservation_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// First usable key, in `reservationId`, `id`, `_id` order.
    pub fn get(&self) -> Option<&ReservationId> {
        self.reservation_id
            .as_ref()
            .or(self.id.as_ref())
            .or(self.mongo_id.as_ref())
    }

    pub fn into_id(self) -> Option<ReservationId> {
        self.reservation_id.or(self.id).or(self.mongo_id)
    }
}

/// Coordinates as producers send them.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum RawCoords {
    /// `[a, b]` in either ordering.
    Pair([f64; 2]),
    /// Explicit `{lat, lng}` object. Preferred.
    Point {
        lat: f64,
        #[serde(alias = "lon", alias = "long")]
        lng: f64,
    },
    /// GeoJSON-like `{coordinates: [lng, lat]}`.
    GeoJson { coordinates: [f64; 2] },
}

impl RawCoords {
    pub fn resolve(&self) -> Option<LatLng> {
        match *self {
            RawCoords::Pair([first, second]) => normalize_coords(first, second),
            RawCoords::Point { lat, lng } => Some(LatLng::new(lat, lng)).filter(LatLng::is_valid),
            RawCoords::GeoJson { coordinates: [lng, lat] } => normalize_coords(lat, lng),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerInfo {
    #[serde(alias = "prenom", default)]
    pub first_name: Option<String>,
    #[serde(alias = "nom", default)]
    pub last_name: Option<String>,
    #[serde(alias = "telephone", default)]
    pub phone: Option<String>,
}

impl PassengerInfo {
    /// "First Last" from whatever parts are present.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Trip request payload of a `course:demande` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOffer {
    #[serde(flatten)]
    pub ids: ReservationKeys,
    #[serde(alias = "depart", alias = "pickupCoords", default, deserialize_with = "lenient")]
    pub pickup: Option<RawCoords>,
    #[serde(alias = "arrivee", alias = "destinationCoords", default, deserialize_with = "lenient")]
    pub destination: Option<RawCoords>,
    #[serde(alias = "departAdresse", default, deserialize_with = "lenient")]
    pub pickup_address: Option<String>,
    #[serde(alias = "arriveeAdresse", default, deserialize_with = "lenient")]
    pub destination_address: Option<String>,
    #[serde(alias = "client", alias = "passager", default, deserialize_with = "lenient")]
    pub passenger: Option<PassengerInfo>,
    #[serde(alias = "countdown", alias = "timeout", default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u32>,
}

impl RawOffer {
    pub fn with_id(id: impl Into<ReservationId>) -> Self {
        Self {
            ids: ReservationKeys::new(id),
            pickup: None,
            destination: None,
            pickup_address: None,
            destination_address: None,
            passenger: None,
            expires_in: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferResponse {
    Accepting,
    Rejecting,
}

/// An incoming trip proposal held by the driver until it is resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripOffer {
    pub id: ReservationId,
    pub pickup: Option<LatLng>,
    pub destination: Option<LatLng>,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub passenger: Option<PassengerInfo>,
    pub distance_km: Option<f64>,
    pub too_far: bool,
    pub countdown_secs: u32,
    pub received_at: DateTime<Utc>,
    /// Set once accept/reject was sent; cleared only by removal.
    pub awaiting_response: Option<OfferResponse>,
    #[serde(skip)]
    pub expires_at: Instant,
}

impl TripOffer {
    /// Build an offer from a raw request. `None` when the request has no id.
    pub fn from_request(
        raw: RawOffer,
        driver_location: LatLng,
        max_distance_km: f64,
        default_countdown_secs: u32,
        now: Instant,
    ) -> Option<Self> {
        let id = raw.ids.into_id()?;
        let pickup = raw.pickup.as_ref().and_then(RawCoords::resolve);
        let destination = raw.destination.as_ref().and_then(RawCoords::resolve);
        let distance_km = pickup.and_then(|p| driver_location.distance_to(&p));
        let countdown_secs = raw
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(default_countdown_secs);

        Some(Self {
            id,
            pickup,
            destination,
            pickup_address: raw.pickup_address,
            destination_address: raw.destination_address,
            passenger: raw.passenger,
            distance_km,
            too_far: distance_km.is_some_and(|d| d > max_distance_km),
            countdown_secs,
            received_at: Utc::now(),
            awaiting_response: None,
            expires_at: now + Duration::from_secs(u64::from(countdown_secs)),
        })
    }

    /// Whole seconds left before expiry, rounded up.
    pub fn expires_in(&self, now: Instant) -> u32 {
        let remaining = self.expires_at.saturating_duration_since(now);
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    pub fn passenger_name(&self) -> Option<String> {
        self.passenger.as_ref().and_then(PassengerInfo::display_name)
    }
}

/// Offer as the UI sees it: the offer plus its live countdown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: TripOffer,
    pub expires_in: u32,
}
