//! Domain record shapes persisted by the store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use hemolink_common::{BloodType, QueueKind, Urgency};

/// Payload types that can be captured in a durable write queue.
///
/// The associated kind routes a record to its backing table; beyond that
/// the queue treats payloads as opaque JSON, so adding a record type means
/// implementing this trait and nothing else.
pub trait QueueRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Which queue this record type belongs to.
    const QUEUE: QueueKind;
}

/// An emergency blood request, captured by hospital staff possibly while
/// offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub patient_name: String,
    pub hospital: String,
    pub blood_type: BloodType,
    /// Units of blood requested.
    pub units: u32,
    pub urgency: Urgency,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

impl QueueRecord for EmergencyRequest {
    const QUEUE: QueueKind = QueueKind::Emergency;
}

/// A blood delivery dispatch, captured by blood bank staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Server id of the request this delivery fulfils, when known.
    pub request_ref: Option<String>,
    pub blood_bank: String,
    pub hospital: String,
    pub blood_type: BloodType,
    pub units: u32,
    pub courier: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

impl QueueRecord for DeliveryRecord {
    const QUEUE: QueueKind = QueueKind::Delivery;
}

/// Kind of facility listed in the reference cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityKind {
    Hospital,
    BloodBank,
}

impl FacilityKind {
    /// Stable name used for the storage encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityKind::Hospital => "hospital",
            FacilityKind::BloodBank => "blood_bank",
        }
    }

    /// Inverse of [`FacilityKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hospital" => Some(FacilityKind::Hospital),
            "blood_bank" => Some(FacilityKind::BloodBank),
            _ => None,
        }
    }
}

/// A nearby facility as fetched from the remote lookup service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    /// Server-assigned id.
    pub id: String,
    pub name: String,
    pub kind: FacilityKind,
    pub city: String,
    pub phone: Option<String>,
    /// Distance from the requesting client, when the service computed one.
    pub distance_km: Option<f64>,
}

/// A facility row as read back from the cache, with its refresh stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFacility {
    pub facility: Facility,
    /// When this row was last written by a refresh.
    pub cached_at: DateTime<Utc>,
}
