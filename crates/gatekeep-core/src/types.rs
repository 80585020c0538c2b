use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of dimensions in a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

/// Who an enrolled record belongs to.
///
/// Ordering is total: persons sort before visitors, then by id. Matcher
/// tie-breaks and registry index collisions resolve to the lowest subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    Person(u64),
    Visitor(u64),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Person(id) => write!(f, "person:{id}"),
            Subject::Visitor(id) => write!(f, "visitor:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    #[default]
    Active,
    Inactive,
}

/// An identity as exported by the enrollment store.
///
/// The descriptor is kept as raw floats here; the registry validates it
/// when building a snapshot so one bad record never poisons a refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub subject: Subject,
    pub display_name: String,
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
    #[serde(default)]
    pub physical_rfid: Option<String>,
    #[serde(default)]
    pub virtual_rfid: Option<String>,
    #[serde(default = "enabled")]
    pub face_enabled: bool,
    #[serde(default = "enabled")]
    pub physical_rfid_enabled: bool,
    #[serde(default = "enabled")]
    pub virtual_rfid_enabled: bool,
    #[serde(default)]
    pub status: IdentityStatus,
    /// Start of the enrollment period or visitor pass, if bounded.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

fn enabled() -> bool {
    true
}

impl EnrolledIdentity {
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    /// Whether `now` falls inside the identity's validity period.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let started = self.valid_from.map_or(true, |from| now >= from);
        let not_ended = self.valid_until.map_or(true, |until| now < until);
        started && not_ended
    }

    /// Whether the given channel is enabled for this identity.
    pub fn channel_enabled(&self, method: AccessMethod) -> bool {
        match method {
            AccessMethod::Facial => self.face_enabled,
            AccessMethod::RfidPhysical => self.physical_rfid_enabled,
            AccessMethod::RfidVirtual => self.virtual_rfid_enabled,
        }
    }
}

/// A validated 128-dimensional face descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Validate raw floats as a descriptor: exactly [`DESCRIPTOR_DIM`]
    /// values, all finite.
    pub fn new(values: Vec<f32>) -> Result<Self, crate::MatchError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(crate::MatchError::InvalidDescriptor {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(crate::MatchError::NonFinite);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance to a raw probe of the same dimension.
    pub fn euclidean_distance(&self, probe: &[f32]) -> f32 {
        self.values
            .iter()
            .zip(probe.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// The identification channel an access decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMethod {
    Facial,
    RfidPhysical,
    RfidVirtual,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::Facial => "facial",
            AccessMethod::RfidPhysical => "rfid-physical",
            AccessMethod::RfidVirtual => "rfid-virtual",
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identification event from either producer.
#[derive(Debug, Clone)]
pub enum AccessEvent {
    /// A probe descriptor from the camera loop, with optional encoded evidence.
    Facial {
        probe: Vec<f32>,
        evidence: Option<Vec<u8>>,
    },
    /// A raw line from an RFID reader or an injected virtual code.
    RfidRead { raw: String },
}

/// A terminal access decision, written once to the access log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub id: Uuid,
    pub subject: Subject,
    pub display_name: String,
    pub method: AccessMethod,
    /// Facial confidence 0–100, absent for RFID decisions.
    pub confidence: Option<u8>,
    /// `false` for audited denials.
    pub granted: bool,
    pub decided_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence: Option<Vec<u8>>,
}
