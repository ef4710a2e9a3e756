//! Configuration for the driver coordinator.
//!
//! Loaded from an optional TOML file with CLI overrides applied on top.
//! Every field has a default, so an empty file (or no file) is valid.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::models::DriverIdentity;
use crate::services::session::TripSettings;
use crate::utils::geo::LatLng;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid realtime url: {0}")]
    Url(#[from] url::ParseError),

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub driver: DriverConfig,
    pub trips: TripsConfig,
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/realtime".to_string(),
        }
    }
}

/// Authenticated driver. Without an id the session cannot go online.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub id: Option<String>,
    pub role: String,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            id: None,
            role: "driver".to_string(),
            last_name: None,
            first_name: None,
        }
    }
}

impl DriverConfig {
    pub fn identity(&self) -> Option<DriverIdentity> {
        let id = self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        Some(DriverIdentity {
            driver_id: id.to_string(),
            role: self.role.clone(),
            last_name: self.last_name.clone(),
            first_name: self.first_name.clone(),
        })
    }
}

/// What going offline does while a trip step is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Refuse until the driver is back to idle.
    #[default]
    Block,
    /// Drop everything, in-flight trips included.
    ForceReset,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TripsConfig {
    pub max_offer_distance_km: f64,
    pub offer_countdown_secs: u32,
    pub countdown_tick_ms: u64,
    pub position_interval_secs: u64,
    pub offline_policy: OfflinePolicy,
    pub alert_ttl_secs: u64,
}

impl Default for TripsConfig {
    fn default() -> Self {
        Self {
            max_offer_distance_km: 5.0,
            offer_countdown_secs: 30,
            countdown_tick_ms: 1000,
            position_interval_secs: 4,
            offline_policy: OfflinePolicy::Block,
            alert_ttl_secs: 8,
        }
    }
}

/// Fallback driver position when the device has no fix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub default_lat: f64,
    pub default_lng: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            default_lat: 9.6412,
            default_lng: -13.5784,
        }
    }
}

impl LocationConfig {
    pub fn default_location(&self) -> LatLng {
        LatLng::new(self.default_lat, self.default_lng)
    }
}

impl CoordinatorConfig {
    pub fn trip_settings(&self) -> TripSettings {
        TripSettings {
            max_offer_distance_km: self.trips.max_offer_distance_km,
            offer_countdown_secs: self.trips.offer_countdown_secs,
            countdown_tick: Duration::from_millis(self.trips.countdown_tick_ms),
            position_interval: Duration::from_secs(self.trips.position_interval_secs),
            offline_policy: self.trips.offline_policy,
            alert_ttl: Duration::from_secs(self.trips.alert_ttl_secs),
            default_location: self.location.default_location(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let trips = &self.trips;
        if !(trips.max_offer_distance_km.is_finite() && trips.max_offer_distance_km > 0.0) {
            return Err(ConfigError::Validation(
                "trips.max_offer_distance_km must be a positive number".to_string(),
            ));
        }
        if trips.offer_countdown_secs == 0 {
            return Err(ConfigError::Validation("trips.offer_countdown_secs must be > 0".to_string()));
        }
        if trips.countdown_tick_ms == 0 || trips.position_interval_secs == 0 {
            return Err(ConfigError::Validation("timer intervals must be > 0".to_string()));
        }
        if !self.location.default_location().is_valid() {
            return Err(ConfigError::Validation(format!(
                "default location ({}, {}) is not a valid coordinate",
                self.location.default_lat, self.location.default_lng
            )));
        }

        let url = Url::parse(&self.realtime.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Validation(format!(
                "realtime.url must use ws or wss, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// Overrides coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<SocketAddr>,
    pub realtime_url: Option<String>,
    pub driver_id: Option<String>,
}

/// Configuration loader: read, override, validate.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
}

impl ConfigLoader {
    pub fn new(config_path: Option<impl AsRef<Path>>, overrides: ConfigOverrides) -> Self {
        Self {
            config_path: config_path.map(|path| path.as_ref().to_path_buf()),
            overrides,
        }
    }

    pub fn load(&self) -> Result<CoordinatorConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => {
                tracing::info!("No config file given, using defaults");
                CoordinatorConfig::default()
            }
        };

        if let Some(listen) = self.overrides.listen {
            config.server.listen = listen;
        }
        if let Some(url) = &self.overrides.realtime_url {
            config.realtime.url = url.clone();
        }
        if let Some(driver_id) = &self.overrides.driver_id {
            config.driver.id = Some(driver_id.clone());
        }

        config.validate()?;
        Ok(config)
    }
}
