//! gatekeep-core: access arbitration engine.
//!
//! Correlates facial-descriptor matches and RFID credential reads into a
//! single de-duplicated access decision per entry event.

pub mod arbiter;
pub mod cooldown;
pub mod credential;
pub mod matcher;
pub mod registry;
pub mod types;

pub use arbiter::{Arbiter, ArbiterConfig, ArbiterStats, DenyReason, Outcome, RejectReason};
pub use cooldown::CooldownCache;
pub use credential::{CredentialError, Resolution, RfidChannel};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher};
pub use registry::{DescriptorRegistry, RefreshSummary, RegistrySnapshot};
pub use types::{
    AccessDecision, AccessEvent, AccessMethod, Descriptor, EnrolledIdentity, IdentityStatus,
    Subject, DESCRIPTOR_DIM,
};
