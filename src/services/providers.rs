// src/services/providers.rs
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::DriverIdentity;
use crate::utils::geo::LatLng;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("no position fix available yet")]
    Unavailable,

    #[error("invalid position: lat={lat}, lng={lng}")]
    Invalid { lat: f64, lng: f64 },
}

/// Source of the driver's device position.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<LatLng, GeoError>;

    /// Latest fix, updated as the device reports new ones.
    fn watch_position(&self) -> watch::Receiver<Option<LatLng>>;
}

/// Positions pushed in by the device (through the control API).
#[derive(Debug)]
pub struct DeviceGeolocation {
    latest: watch::Sender<Option<LatLng>>,
}

impl DeviceGeolocation {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest }
    }

    pub fn push(&self, position: LatLng) -> Result<(), GeoError> {
        if !position.is_valid() {
            return Err(GeoError::Invalid {
                lat: position.lat,
                lng: position.lng,
            });
        }
        self.latest.send_replace(Some(position));
        Ok(())
    }
}

impl Default for DeviceGeolocation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeolocationProvider for DeviceGeolocation {
    async fn current_position(&self) -> Result<LatLng, GeoError> {
        (*self.latest.borrow()).ok_or(GeoError::Unavailable)
    }

    fn watch_position(&self) -> watch::Receiver<Option<LatLng>> {
        self.latest.subscribe()
    }
}

/// Source of the authenticated driver's identity.
pub trait IdentityProvider: Send + Sync {
    fn current_driver(&self) -> Option<DriverIdentity>;
}

/// Identity fixed at startup from configuration.
#[derive(Debug, Clone)]
pub struct StaticIdentity(Option<DriverIdentity>);

impl StaticIdentity {
    pub fn new(identity: Option<DriverIdentity>) -> Self {
        Self(identity)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_driver(&self) -> Option<DriverIdentity> {
        self.0.clone()
    }
}
