// src/state.rs
use std::sync::Arc;
use url::Url;

use crate::config::CoordinatorConfig;
use crate::errors::{CoordinatorError, CoordinatorResult};
use crate::services::{
    DeviceGeolocation, RealtimeChannel, SessionHandle, SessionRuntime, StaticIdentity, WebSocketChannel,
};

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub geolocation: Arc<DeviceGeolocation>,
}

impl AppState {
    /// Wire the realtime channel and providers into a session. The returned
    /// runtime must be spawned for the handle to answer.
    pub fn new(config: &CoordinatorConfig) -> CoordinatorResult<(Self, SessionRuntime)> {
        let server_url = Url::parse(&config.realtime.url)
            .map_err(|err| CoordinatorError::configuration(format!("realtime.url: {}", err)))?;
        let channel: Arc<dyn RealtimeChannel> = Arc::new(WebSocketChannel::new(server_url));

        let identity = config.driver.identity();
        if identity.is_none() {
            tracing::warn!("No driver id configured; the session cannot go online");
        }

        let geolocation = Arc::new(DeviceGeolocation::new());
        let (runtime, session) = SessionRuntime::new(
            config.trip_settings(),
            channel,
            Arc::new(StaticIdentity::new(identity)),
            geolocation.clone(),
        );

        Ok((Self { session, geolocation }, runtime))
    }
}
