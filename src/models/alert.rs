// src/models/alert.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// A user-facing alert. Persistent alerts stay until dismissed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverAlert {
    pub id: Uuid,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub persistent: bool,
    pub raised_at: DateTime<Utc>,
    #[serde(skip)]
    expires_at: Option<Instant>,
}

#[derive(Debug)]
pub struct AlertCenter {
    alerts: Vec<DriverAlert>,
    ttl: Duration,
}

impl AlertCenter {
    pub fn new(ttl: Duration) -> Self {
        Self { alerts: Vec::new(), ttl }
    }

    pub fn raise_persistent(
        &mut self,
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Uuid {
        self.push(level, title.into(), message.into(), None)
    }

    pub fn raise_transient(
        &mut self,
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
        now: Instant,
    ) -> Uuid {
        let expires_at = now + self.ttl;
        self.push(level, title.into(), message.into(), Some(expires_at))
    }

    fn push(&mut self, level: AlertLevel, title: String, message: String, expires_at: Option<Instant>) -> Uuid {
        let alert = DriverAlert {
            id: Uuid::new_v4(),
            level,
            title,
            message,
            persistent: expires_at.is_none(),
            raised_at: Utc::now(),
            expires_at,
        };
        let id = alert.id;
        tracing::debug!(alert_id = %id, ?level, persistent = alert.persistent, "Raised alert: {}", alert.title);
        self.alerts.push(alert);
        id
    }

    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.alerts.len();
        self.alerts.retain(|alert| alert.id != id);
        self.alerts.len() != before
    }

    /// Drop transient alerts whose lifetime is over.
    pub fn prune(&mut self, now: Instant) {
        self.alerts
            .retain(|alert| alert.expires_at.is_none_or(|expires_at| expires_at > now));
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriverAlert> {
        self.alerts.iter()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_alerts_expire_persistent_ones_stay() {
        let now = Instant::now();
        let mut center = AlertCenter::new(Duration::from_secs(8));

        center.raise_persistent(AlertLevel::Critical, "Trip cancelled", "Passenger cancelled");
        center.raise_transient(AlertLevel::Warning, "Room refused", "Could not join", now);
        assert_eq!(center.len(), 2);

        center.prune(now + Duration::from_secs(7));
        assert_eq!(center.len(), 2);

        center.prune(now + Duration::from_secs(8));
        assert_eq!(center.len(), 1);
        assert!(center.iter().all(|alert| alert.persistent));
    }

    #[test]
    fn test_dismiss() {
        let mut center = AlertCenter::new(Duration::from_secs(8));
        let id = center.raise_persistent(AlertLevel::Critical, "Trip cancelled", "");
        assert!(!center.dismiss(Uuid::new_v4()));
        assert!(center.dismiss(id));
        assert!(center.is_empty());
    }
}
