//! RFID credential normalization and resolution.
//!
//! Reader firmware and virtual-code transports prepend human-readable labels
//! ("UID:", "Código:") and pad with whitespace. Both enrolled codes and raw
//! reads go through [`normalize`] so the two sides compare byte-for-byte.

use crate::registry::RegistrySnapshot;
use crate::types::{AccessMethod, EnrolledIdentity, Subject};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Shortest code accepted after normalization.
pub const MIN_CODE_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("empty credential read")]
    Empty,
    #[error("credential too short: {len} characters (minimum {MIN_CODE_LEN})")]
    TooShort { len: usize },
}

/// Which index a raw code resolved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfidChannel {
    Physical,
    Virtual,
}

impl RfidChannel {
    pub fn method(self) -> AccessMethod {
        match self {
            RfidChannel::Physical => AccessMethod::RfidPhysical,
            RfidChannel::Virtual => AccessMethod::RfidVirtual,
        }
    }
}

/// Outcome of resolving one code against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { subject: Subject, channel: RfidChannel },
    /// A record exists but the channel is disabled or the identity is inactive.
    Disabled { subject: Subject, channel: RfidChannel },
    Unknown,
}

impl Resolution {
    /// The subject the arbiter may act on. Disabled credentials look unknown.
    pub fn subject(&self) -> Option<Subject> {
        match self {
            Resolution::Resolved { subject, .. } => Some(*subject),
            Resolution::Disabled { .. } | Resolution::Unknown => None,
        }
    }
}

/// Trim, strip a leading `LABEL:` prefix, and uppercase a raw code.
///
/// Only the first segment can be a label, and only when it is not itself a
/// run of hex digits, so colon-separated UIDs such as `04:A1:B2:C3` survive.
pub fn normalize(raw: &str) -> Result<String, CredentialError> {
    let trimmed = raw.trim();
    let code = match trimmed.split_once(':') {
        Some((label, rest)) if is_label(label) => rest,
        _ => trimmed,
    };
    let code = code.trim().to_uppercase();

    if code.is_empty() {
        return Err(CredentialError::Empty);
    }
    let len = code.chars().count();
    if len < MIN_CODE_LEN {
        return Err(CredentialError::TooShort { len });
    }
    Ok(code)
}

fn is_label(segment: &str) -> bool {
    let segment = segment.trim();
    segment.is_empty() || !segment.chars().all(|c| c.is_ascii_hexdigit())
}

/// Short stable fingerprint of a code, safe to put in logs.
pub fn fingerprint(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Resolve a raw read: physical index first, then virtual.
pub fn resolve(snapshot: &RegistrySnapshot, raw: &str) -> Result<Resolution, CredentialError> {
    let code = normalize(raw)?;

    let hit = snapshot
        .lookup_physical(&code)
        .map(|identity| (identity, RfidChannel::Physical))
        .or_else(|| {
            snapshot
                .lookup_virtual(&code)
                .map(|identity| (identity, RfidChannel::Virtual))
        });

    let Some((identity, channel)) = hit else {
        return Ok(Resolution::Unknown);
    };

    Ok(gate(identity, channel))
}

fn gate(identity: &EnrolledIdentity, channel: RfidChannel) -> Resolution {
    let subject = identity.subject;
    if identity.is_active() && identity.channel_enabled(channel.method()) {
        Resolution::Resolved { subject, channel }
    } else {
        Resolution::Disabled { subject, channel }
    }
}
