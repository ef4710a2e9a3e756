// src/models/driver.rs
use serde::{Deserialize, Serialize};

/// Identity the realtime server expects when a driver connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverIdentity {
    pub driver_id: String,
    pub role: String,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
}

impl DriverIdentity {
    pub fn new(driver_id: impl Into<String>) -> Self {
        Self {
            driver_id: driver_id.into(),
            role: "driver".to_string(),
            last_name: None,
            first_name: None,
        }
    }
}
