//! Access arbitration: one decision per qualifying identification event.
//!
//! ```text
//! Idle -> Identifying -> Accepted -> Granted | Denied | Suppressed
//!                     \-> Rejected
//! ```
//!
//! The arbiter owns the cooldown cache. A grant is recorded in the cache
//! only after the caller-supplied `emit` hook accepted the decision, so a
//! decision that never reached the access log does not start a cooldown.

use crate::cooldown::{CooldownCache, DEFAULT_COOLDOWN_CAPACITY, DEFAULT_COOLDOWN_WINDOW};
use crate::credential::{self, CredentialError, Resolution};
use crate::matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_MAX_DISTANCE};
use crate::registry::RegistrySnapshot;
use crate::types::{AccessDecision, AccessEvent, AccessMethod, EnrolledIdentity, Subject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Tunables for the arbiter.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Maximum Euclidean distance accepted as a facial match.
    pub max_distance: f32,
    /// Minimum spacing between two grants for one subject, across channels.
    pub cooldown_window: Duration,
    /// Bound on subjects tracked by the cooldown cache.
    pub cooldown_capacity: usize,
    /// Emit `Denied` decisions to the access log for audit.
    pub audit_denied: bool,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
            cooldown_capacity: DEFAULT_COOLDOWN_CAPACITY,
            audit_denied: true,
        }
    }
}

/// Why an event produced no identity.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    InvalidDescriptor(MatchError),
    UnknownFace,
    InvalidCredential(CredentialError),
    UnknownCredential,
    DisabledChannel { subject: Subject, method: AccessMethod },
    /// The decision could not be handed to the access log.
    SinkUnavailable,
}

/// Why an identified subject was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotYetValid,
    Expired,
}

/// Terminal state of one arbitration.
#[derive(Debug, Clone)]
pub enum Outcome {
    Granted(AccessDecision),
    Denied {
        subject: Subject,
        method: AccessMethod,
        reason: DenyReason,
        /// Present when the denial was written for audit.
        decision: Option<AccessDecision>,
    },
    Suppressed {
        subject: Subject,
        method: AccessMethod,
        remaining: Duration,
    },
    Rejected(RejectReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Granted(_) => "granted",
            Outcome::Denied { .. } => "denied",
            Outcome::Suppressed { .. } => "suppressed",
            Outcome::Rejected(_) => "rejected",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Outcome::Granted(_))
    }
}

/// Running outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    pub granted: u64,
    pub denied: u64,
    pub suppressed: u64,
    pub rejected: u64,
    pub invalid: u64,
}

/// An identity accepted by the matcher or resolver, awaiting the cooldown check.
struct Accepted<'a> {
    identity: &'a EnrolledIdentity,
    method: AccessMethod,
    confidence: Option<u8>,
    evidence: Option<Vec<u8>>,
}

pub struct Arbiter<M: Matcher = EuclideanMatcher> {
    matcher: M,
    cooldown: CooldownCache,
    audit_denied: bool,
    stats: ArbiterStats,
}

impl Arbiter<EuclideanMatcher> {
    pub fn new(config: &ArbiterConfig) -> Self {
        Self::with_matcher(EuclideanMatcher::new(config.max_distance), config)
    }
}

impl<M: Matcher> Arbiter<M> {
    pub fn with_matcher(matcher: M, config: &ArbiterConfig) -> Self {
        Self {
            matcher,
            cooldown: CooldownCache::new(config.cooldown_window, config.cooldown_capacity),
            audit_denied: config.audit_denied,
            stats: ArbiterStats::default(),
        }
    }

    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }

    pub fn cooldown(&self) -> &CooldownCache {
        &self.cooldown
    }

    /// Drop expired cooldown entries.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.cooldown.sweep(now)
    }

    /// Arbitrate one event against `snapshot` at time `now`.
    ///
    /// `emit` hands a decision to the access log; it must not block. A grant
    /// whose `emit` fails is reported as `Rejected(SinkUnavailable)` and does
    /// not start a cooldown.
    pub fn process<E, F>(
        &mut self,
        event: AccessEvent,
        snapshot: &RegistrySnapshot,
        now: DateTime<Utc>,
        mut emit: F,
    ) -> Outcome
    where
        F: FnMut(&AccessDecision) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let outcome = match self.identify(event, snapshot) {
            Err(reason) => Outcome::Rejected(reason),
            Ok(accepted) => self.decide(accepted, now, &mut emit),
        };
        self.count(&outcome);
        outcome
    }

    fn identify<'a>(
        &self,
        event: AccessEvent,
        snapshot: &'a RegistrySnapshot,
    ) -> Result<Accepted<'a>, RejectReason> {
        match event {
            AccessEvent::Facial { probe, evidence } => {
                let result = self
                    .matcher
                    .find_closest(&probe, snapshot)
                    .map_err(RejectReason::InvalidDescriptor)?;
                let subject = result.subject.ok_or(RejectReason::UnknownFace)?;
                let identity = snapshot.identity(subject).ok_or(RejectReason::UnknownFace)?;

                if !identity.is_active() || !identity.face_enabled {
                    return Err(RejectReason::DisabledChannel {
                        subject,
                        method: AccessMethod::Facial,
                    });
                }

                Ok(Accepted {
                    identity,
                    method: AccessMethod::Facial,
                    confidence: Some(result.confidence_pct()),
                    evidence,
                })
            }
            AccessEvent::RfidRead { raw } => {
                let resolution =
                    credential::resolve(snapshot, &raw).map_err(RejectReason::InvalidCredential)?;
                match resolution {
                    Resolution::Resolved { subject, channel } => {
                        let identity = snapshot
                            .identity(subject)
                            .ok_or(RejectReason::UnknownCredential)?;
                        Ok(Accepted {
                            identity,
                            method: channel.method(),
                            confidence: None,
                            evidence: None,
                        })
                    }
                    Resolution::Disabled { subject, channel } => Err(RejectReason::DisabledChannel {
                        subject,
                        method: channel.method(),
                    }),
                    Resolution::Unknown => {
                        if let Ok(code) = credential::normalize(&raw) {
                            tracing::debug!(code = %credential::fingerprint(&code), "unknown credential");
                        }
                        Err(RejectReason::UnknownCredential)
                    }
                }
            }
        }
    }

    fn decide<E, F>(&mut self, accepted: Accepted<'_>, now: DateTime<Utc>, emit: &mut F) -> Outcome
    where
        F: FnMut(&AccessDecision) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let identity = accepted.identity;
        let subject = identity.subject;
        let method = accepted.method;

        if let Some(reason) = validity(identity, now) {
            let decision = self.audit_denied.then(|| AccessDecision {
                id: Uuid::new_v4(),
                subject,
                display_name: identity.display_name.clone(),
                method,
                confidence: accepted.confidence,
                granted: false,
                decided_at: now,
                evidence: accepted.evidence.clone(),
            });
            let decision = match decision {
                Some(d) => match emit(&d) {
                    Ok(()) => Some(d),
                    Err(e) => {
                        tracing::warn!(%subject, error = %e, "could not log denied access");
                        None
                    }
                },
                None => None,
            };
            tracing::info!(%subject, %method, ?reason, "access denied");
            return Outcome::Denied {
                subject,
                method,
                reason,
                decision,
            };
        }

        if let Some(remaining) = self.cooldown.remaining(subject, now) {
            tracing::debug!(%subject, %method, remaining_ms = remaining.as_millis() as u64, "access suppressed by cooldown");
            return Outcome::Suppressed {
                subject,
                method,
                remaining,
            };
        }

        let decision = AccessDecision {
            id: Uuid::new_v4(),
            subject,
            display_name: identity.display_name.clone(),
            method,
            confidence: accepted.confidence,
            granted: true,
            decided_at: now,
            evidence: accepted.evidence,
        };

        if let Err(e) = emit(&decision) {
            tracing::error!(%subject, %method, error = %e, "access log unavailable; grant not recorded");
            return Outcome::Rejected(RejectReason::SinkUnavailable);
        }
        self.cooldown.record_grant(subject, now);

        tracing::info!(
            %subject,
            %method,
            confidence = ?decision.confidence,
            decision = %decision.id,
            "access granted"
        );
        Outcome::Granted(decision)
    }

    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Granted(_) => self.stats.granted += 1,
            Outcome::Denied { .. } => self.stats.denied += 1,
            Outcome::Suppressed { .. } => self.stats.suppressed += 1,
            Outcome::Rejected(RejectReason::InvalidDescriptor(_))
            | Outcome::Rejected(RejectReason::InvalidCredential(_)) => {
                self.stats.rejected += 1;
                self.stats.invalid += 1;
            }
            Outcome::Rejected(_) => self.stats.rejected += 1,
        }
    }
}

fn validity(identity: &EnrolledIdentity, now: DateTime<Utc>) -> Option<DenyReason> {
    if identity.is_valid_at(now) {
        return None;
    }
    match identity.valid_from {
        Some(from) if now < from => Some(DenyReason::NotYetValid),
        _ => Some(DenyReason::Expired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DescriptorRegistry;
    use crate::types::{IdentityStatus, DESCRIPTOR_DIM};
    use chrono::{TimeDelta, TimeZone};
    use std::convert::Infallible;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn d1() -> Vec<f32> {
        (0..DESCRIPTOR_DIM).map(|i| (i as f32) / 1000.0).collect()
    }

    fn p1() -> EnrolledIdentity {
        EnrolledIdentity {
            subject: Subject::Person(1),
            display_name: "P1".into(),
            descriptor: Some(d1()),
            physical_rfid: Some("AB12CD34".into()),
            virtual_rfid: Some("V-0001".into()),
            face_enabled: true,
            physical_rfid_enabled: true,
            virtual_rfid_enabled: true,
            status: IdentityStatus::Active,
            valid_from: None,
            valid_until: None,
        }
    }

    fn snapshot(records: Vec<EnrolledIdentity>) -> Arc<RegistrySnapshot> {
        let registry = DescriptorRegistry::new();
        registry.replace(records);
        registry.snapshot()
    }

    fn config() -> ArbiterConfig {
        ArbiterConfig {
            cooldown_window: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn face(probe: Vec<f32>) -> AccessEvent {
        AccessEvent::Facial { probe, evidence: None }
    }

    fn card(raw: &str) -> AccessEvent {
        AccessEvent::RfidRead { raw: raw.into() }
    }

    /// Runs one event, collecting emitted decisions.
    fn run(
        arbiter: &mut Arbiter,
        snap: &RegistrySnapshot,
        event: AccessEvent,
        now: DateTime<Utc>,
        log: &mut Vec<AccessDecision>,
    ) -> Outcome {
        arbiter.process(event, snap, now, |d| {
            log.push(d.clone());
            Ok::<(), Infallible>(())
        })
    }

    #[test]
    fn test_face_then_card_within_window_then_card_after() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();

        let first = run(&mut arbiter, &snap, face(d1()), t(0), &mut log);
        let decision = match first {
            Outcome::Granted(d) => d,
            other => panic!("expected grant, got {other:?}"),
        };
        assert_eq!(decision.method, AccessMethod::Facial);
        assert_eq!(decision.confidence, Some(100));
        assert_eq!(decision.subject, Subject::Person(1));

        let second = run(&mut arbiter, &snap, card("Código: AB12CD34"), t(2), &mut log);
        assert!(matches!(
            second,
            Outcome::Suppressed { method: AccessMethod::RfidPhysical, .. }
        ));

        let third = run(&mut arbiter, &snap, card("AB12CD34"), t(6), &mut log);
        let decision = match third {
            Outcome::Granted(d) => d,
            other => panic!("expected grant, got {other:?}"),
        };
        assert_eq!(decision.method, AccessMethod::RfidPhysical);
        assert_eq!(decision.confidence, None);

        assert_eq!(log.len(), 2);
        assert_eq!(
            arbiter.stats(),
            ArbiterStats { granted: 2, suppressed: 1, ..Default::default() }
        );
    }

    #[test]
    fn test_grant_exactly_at_window_edge() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        assert!(run(&mut arbiter, &snap, card("AB12CD34"), t(0), &mut log).is_granted());
        assert!(run(&mut arbiter, &snap, card("V-0001"), t(5), &mut log).is_granted());
    }

    #[test]
    fn test_unknown_code_is_rejected_without_log() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        let outcome = run(&mut arbiter, &snap, card("ZZ99"), t(0), &mut log);
        assert!(matches!(outcome, Outcome::Rejected(RejectReason::UnknownCredential)));
        assert!(log.is_empty());
        // The next event is processed normally.
        assert!(run(&mut arbiter, &snap, card("AB12CD34"), t(1), &mut log).is_granted());
    }

    #[test]
    fn test_face_disabled_rejects_perfect_match() {
        let mut identity = p1();
        identity.face_enabled = false;
        let snap = snapshot(vec![identity]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();

        let outcome = run(&mut arbiter, &snap, face(d1()), t(0), &mut log);
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::DisabledChannel { method: AccessMethod::Facial, .. })
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_inactive_identity_rejected_on_face() {
        let mut identity = p1();
        identity.status = IdentityStatus::Inactive;
        let snap = snapshot(vec![identity]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        assert!(matches!(
            run(&mut arbiter, &snap, face(d1()), t(0), &mut log),
            Outcome::Rejected(RejectReason::DisabledChannel { .. })
        ));
    }

    #[test]
    fn test_far_probe_is_unknown_face() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        let far: Vec<f32> = d1().iter().map(|v| v + 1.0).collect();
        assert!(matches!(
            run(&mut arbiter, &snap, face(far), t(0), &mut log),
            Outcome::Rejected(RejectReason::UnknownFace)
        ));
    }

    #[test]
    fn test_malformed_probe_and_short_code_count_as_invalid() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        assert!(matches!(
            run(&mut arbiter, &snap, face(vec![0.0; 10]), t(0), &mut log),
            Outcome::Rejected(RejectReason::InvalidDescriptor(_))
        ));
        assert!(matches!(
            run(&mut arbiter, &snap, card("UID: 12"), t(0), &mut log),
            Outcome::Rejected(RejectReason::InvalidCredential(CredentialError::TooShort { .. }))
        ));
        assert_eq!(arbiter.stats().invalid, 2);
        assert_eq!(arbiter.stats().rejected, 2);
    }

    #[test]
    fn test_failed_emit_does_not_start_cooldown() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());

        let outcome = arbiter.process(card("AB12CD34"), &snap, t(0), |_| Err("queue full"));
        assert!(matches!(outcome, Outcome::Rejected(RejectReason::SinkUnavailable)));
        assert!(arbiter.cooldown().is_empty());

        let mut log = Vec::new();
        assert!(run(&mut arbiter, &snap, card("AB12CD34"), t(1), &mut log).is_granted());
    }

    #[test]
    fn test_expired_pass_is_denied_and_audited() {
        let mut visitor = p1();
        visitor.subject = Subject::Visitor(4);
        visitor.valid_until = Some(t(-60));
        let snap = snapshot(vec![visitor]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();

        let outcome = run(&mut arbiter, &snap, card("V-0001"), t(0), &mut log);
        let Outcome::Denied { reason, decision, .. } = outcome else {
            panic!("expected denial");
        };
        assert_eq!(reason, DenyReason::Expired);
        assert!(decision.is_some());
        assert_eq!(log.len(), 1);
        assert!(!log[0].granted);
        assert!(arbiter.cooldown().is_empty());
    }

    #[test]
    fn test_not_yet_valid_without_audit() {
        let mut identity = p1();
        identity.valid_from = Some(t(3600));
        let snap = snapshot(vec![identity]);
        let mut arbiter = Arbiter::new(&ArbiterConfig {
            audit_denied: false,
            ..config()
        });
        let mut log = Vec::new();
        let outcome = run(&mut arbiter, &snap, face(d1()), t(0), &mut log);
        assert!(matches!(
            outcome,
            Outcome::Denied { reason: DenyReason::NotYetValid, decision: None, .. }
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_evidence_travels_with_facial_grant() {
        let snap = snapshot(vec![p1()]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();
        let event = AccessEvent::Facial {
            probe: d1(),
            evidence: Some(vec![0xFF, 0xD8, 0xFF]),
        };
        assert!(run(&mut arbiter, &snap, event, t(0), &mut log).is_granted());
        assert_eq!(log[0].evidence.as_deref(), Some(&[0xFF, 0xD8, 0xFF][..]));
    }

    #[test]
    fn test_cooldown_is_per_subject() {
        let mut p2 = p1();
        p2.subject = Subject::Person(2);
        p2.descriptor = None;
        p2.physical_rfid = Some("FFFF0002".into());
        p2.virtual_rfid = None;
        let snap = snapshot(vec![p1(), p2]);
        let mut arbiter = Arbiter::new(&config());
        let mut log = Vec::new();

        assert!(run(&mut arbiter, &snap, card("AB12CD34"), t(0), &mut log).is_granted());
        assert!(run(&mut arbiter, &snap, card("FFFF0002"), t(1), &mut log).is_granted());
        assert_eq!(log.len(), 2);
    }
}
