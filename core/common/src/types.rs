//! Common types used throughout HemoLink.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies which durable write queue a record belongs to.
///
/// The two queues share one implementation but keep independent tables,
/// sync sessions, and status channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Emergency blood requests captured by hospital staff.
    Emergency,
    /// Delivery dispatch records captured by blood bank staff.
    Delivery,
}

impl QueueKind {
    /// Stable lowercase name, used in logs and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Emergency => "emergency",
            QueueKind::Delivery => "delivery",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emergency" => Ok(QueueKind::Emergency),
            "delivery" => Ok(QueueKind::Delivery),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown queue '{}', expected 'emergency' or 'delivery'",
                other
            ))),
        }
    }
}

/// Delivery state of a queued write.
///
/// Stored as an integer (0 pending, 1 synced) because the queue's secondary
/// index needs orderable keys; that mapping lives at the storage boundary,
/// everything above it sees only this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Captured locally, not yet confirmed by the remote service.
    Pending,
    /// Confirmed by the remote service.
    Synced,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Pending => write!(f, "pending"),
            SyncState::Synced => write!(f, "synced"),
        }
    }
}

/// Aggregate status of a sync run, as reported to status listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// A run is in flight.
    Syncing,
    /// The last run delivered every item it attempted.
    Synced,
    /// The last run left at least one item behind.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// ABO blood group with Rh factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    /// The clinical shorthand, e.g. `"AB-"`.
    pub fn code(&self) -> &'static str {
        match self {
            BloodType::APositive => "A+",
            BloodType::ANegative => "A-",
            BloodType::BPositive => "B+",
            BloodType::BNegative => "B-",
            BloodType::AbPositive => "AB+",
            BloodType::AbNegative => "AB-",
            BloodType::OPositive => "O+",
            BloodType::ONegative => "O-",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for BloodType {
    type Err = crate::Error;

    /// Parse a clinical shorthand like `"o-"` or `"AB+"`.
    ///
    /// # Errors
    /// - Returns error if the code is not one of the eight ABO/Rh groups.
    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A+" => Ok(BloodType::APositive),
            "A-" => Ok(BloodType::ANegative),
            "B+" => Ok(BloodType::BPositive),
            "B-" => Ok(BloodType::BNegative),
            "AB+" => Ok(BloodType::AbPositive),
            "AB-" => Ok(BloodType::AbNegative),
            "O+" => Ok(BloodType::OPositive),
            "O-" => Ok(BloodType::ONegative),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown blood type '{}', expected one of A+, A-, B+, B-, AB+, AB-, O+, O-",
                other
            ))),
        }
    }
}

/// How quickly an emergency request must be fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Routine,
    Urgent,
    Critical,
}

impl Urgency {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Routine => "routine",
            Urgency::Urgent => "urgent",
            Urgency::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "routine" => Ok(Urgency::Routine),
            "urgent" => Ok(Urgency::Urgent),
            "critical" => Ok(Urgency::Critical),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown urgency '{}', expected routine, urgent or critical",
                other
            ))),
        }
    }
}
