// src/services/mod.rs
pub mod accepted_trips;
pub mod channel;
pub mod offer_registry;
pub mod position_reporter;
pub mod providers;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod ws_channel;

pub use channel::{ChannelError, RealtimeChannel};
pub use providers::{DeviceGeolocation, GeolocationProvider, IdentityProvider, StaticIdentity};
pub use runtime::{SessionHandle, SessionRuntime};
pub use session::{DriverSession, SessionSnapshot, TripSettings};
pub use ws_channel::WebSocketChannel;
