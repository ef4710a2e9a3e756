// src/handlers/mod.rs
pub mod session_handler;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Control API for the driver UI.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/session", get(session_handler::get_session))
        .route("/session/ws", get(session_handler::session_ws))
        .route("/online", post(session_handler::go_online))
        .route("/offline", post(session_handler::go_offline))
        .route("/offers", get(session_handler::list_offers))
        .route("/offers/:id/accept", post(session_handler::accept_offer))
        .route("/offers/:id/reject", post(session_handler::reject_offer))
        .route("/trips/:id/select", post(session_handler::select_pickup_trip))
        .route("/trips/arrival", post(session_handler::signal_arrival))
        .route("/trips/:id/pickup", post(session_handler::confirm_passenger_pickup))
        .route("/trips/start", post(session_handler::start_global_trip))
        .route("/trips/:id/finish", post(session_handler::finish_trip))
        .route("/location", post(session_handler::update_location))
        .route("/alerts/:id", delete(session_handler::dismiss_alert))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
