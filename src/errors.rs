use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

use crate::config::ConfigError;
use crate::models::{ReservationId, TripStep};
use crate::services::channel::ChannelError;
use crate::services::providers::GeoError;

/// Main error type for the driver trip coordinator
#[derive(Debug)]
pub enum CoordinatorError {
    // Offer and trip lookups
    OfferNotFound(ReservationId),
    TripNotFound(ReservationId),
    AlertNotFound(String),

    // Lifecycle errors
    InvalidTransition { from: TripStep, to: TripStep },
    NoCurrentTrip,
    EmptyPickupBatch,
    PassengerAlreadyOnBoard(ReservationId),
    TripInProgress,
    NotOnline,

    // Session and identity
    MissingIdentity,
    SessionUnavailable,

    // Realtime communication errors
    Channel(ChannelError),

    // Device position
    InvalidCoordinates { lat: f64, lng: f64 },
    LocationUnavailable,

    // Configuration errors
    ConfigurationError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::OfferNotFound(id) => write!(f, "Offer not found: {}", id),
            CoordinatorError::TripNotFound(id) => write!(f, "Accepted trip not found: {}", id),
            CoordinatorError::AlertNotFound(id) => write!(f, "Alert not found: {}", id),

            CoordinatorError::InvalidTransition { from, to } => {
                write!(f, "Cannot move trip step from {} to {}", from, to)
            }
            CoordinatorError::NoCurrentTrip => write!(f, "No pickup trip is selected"),
            CoordinatorError::EmptyPickupBatch => write!(f, "No passenger has been picked up yet"),
            CoordinatorError::PassengerAlreadyOnBoard(id) => {
                write!(f, "Passenger of trip {} is already on board", id)
            }
            CoordinatorError::TripInProgress => {
                write!(f, "Cannot go offline while a trip is in progress")
            }
            CoordinatorError::NotOnline => write!(f, "Driver is offline"),

            CoordinatorError::MissingIdentity => write!(f, "No authenticated driver identity"),
            CoordinatorError::SessionUnavailable => write!(f, "Driver session is not running"),

            CoordinatorError::Channel(err) => write!(f, "Realtime channel error: {}", err),

            CoordinatorError::InvalidCoordinates { lat, lng } => {
                write!(f, "Invalid coordinates: lat={}, lng={}", lat, lng)
            }
            CoordinatorError::LocationUnavailable => write!(f, "No device position available"),

            CoordinatorError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            CoordinatorError::OfferNotFound(_) => (StatusCode::NOT_FOUND, "offer_not_found"),
            CoordinatorError::TripNotFound(_) => (StatusCode::NOT_FOUND, "trip_not_found"),
            CoordinatorError::AlertNotFound(_) => (StatusCode::NOT_FOUND, "alert_not_found"),

            CoordinatorError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            CoordinatorError::NoCurrentTrip => (StatusCode::CONFLICT, "no_current_trip"),
            CoordinatorError::EmptyPickupBatch => (StatusCode::CONFLICT, "empty_pickup_batch"),
            CoordinatorError::PassengerAlreadyOnBoard(_) => (StatusCode::CONFLICT, "passenger_on_board"),
            CoordinatorError::TripInProgress => (StatusCode::CONFLICT, "trip_in_progress"),
            CoordinatorError::NotOnline => (StatusCode::CONFLICT, "not_online"),

            CoordinatorError::MissingIdentity => (StatusCode::UNAUTHORIZED, "missing_identity"),
            CoordinatorError::InvalidCoordinates { .. } => (StatusCode::BAD_REQUEST, "bad_request"),

            CoordinatorError::Channel(_) => (StatusCode::BAD_GATEWAY, "realtime_unavailable"),
            CoordinatorError::SessionUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "session_unavailable"),
            CoordinatorError::LocationUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "location_unavailable"),

            // All other errors are treated as internal server errors
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

// Conversion implementations for common error types
impl From<ChannelError> for CoordinatorError {
    fn from(err: ChannelError) -> Self {
        CoordinatorError::Channel(err)
    }
}

impl From<GeoError> for CoordinatorError {
    fn from(err: GeoError) -> Self {
        match err {
            GeoError::Invalid { lat, lng } => CoordinatorError::InvalidCoordinates { lat, lng },
            GeoError::Unavailable => CoordinatorError::LocationUnavailable,
        }
    }
}

impl From<ConfigError> for CoordinatorError {
    fn from(err: ConfigError) -> Self {
        CoordinatorError::ConfigurationError(err.to_string())
    }
}

// Helper functions for creating common errors
impl CoordinatorError {
    pub fn offer_not_found(id: &ReservationId) -> Self {
        CoordinatorError::OfferNotFound(id.clone())
    }

    pub fn trip_not_found(id: &ReservationId) -> Self {
        CoordinatorError::TripNotFound(id.clone())
    }

    pub fn invalid_transition(from: TripStep, to: TripStep) -> Self {
        CoordinatorError::InvalidTransition { from, to }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        CoordinatorError::ConfigurationError(msg.into())
    }
}
