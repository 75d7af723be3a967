//! The shared data model: targets, target sets, and schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single pointing: a name and a sky position in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl Target {
    pub fn new(name: impl Into<String>, ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            name: name.into(),
            ra_deg,
            dec_deg,
        }
    }
}

/// An ordered sequence of targets. Order matters only within event
/// schedules, where it reflects priority.
pub type TargetSet = Vec<Target>;

/// A prioritized set of targets with an optional expiration.
///
/// Two roles: the singleton host schedule (priority 0, never expires), and
/// one event schedule per alert (`name` is the GraceID or TrigID).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,
    pub targets: TargetSet,
    pub priority: i32,
    pub expiration: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn host(name: impl Into<String>, targets: TargetSet) -> Self {
        Self {
            name: name.into(),
            targets,
            priority: 0,
            expiration: None,
        }
    }

    pub fn event(
        name: impl Into<String>,
        targets: TargetSet,
        priority: i32,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            targets,
            priority,
            expiration: Some(expiration),
        }
    }

    /// An empty, immediately-expired schedule, published for a Retraction.
    pub fn retraction(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
            priority: 0,
            expiration: Some(now),
        }
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= at)
    }
}
