//! Enrolled-identity registry with atomically swapped snapshots.
//!
//! A refresh builds a complete [`RegistrySnapshot`] off to the side and then
//! swaps the pointer. In-flight matches keep the `Arc` they already hold, so
//! they always see one consistent set.

use crate::credential::normalize;
use crate::types::{Descriptor, EnrolledIdentity, Subject};
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Immutable view of the enrolled set at one refresh.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    loaded_at: Option<DateTime<Utc>>,
    /// Sorted by subject.
    identities: Vec<EnrolledIdentity>,
    /// (index into `identities`, validated descriptor), in subject order.
    faces: Vec<(usize, Descriptor)>,
    physical: HashMap<String, usize>,
    virtual_codes: HashMap<String, usize>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn identity(&self, subject: Subject) -> Option<&EnrolledIdentity> {
        self.identities
            .binary_search_by(|probe| probe.subject.cmp(&subject))
            .ok()
            .and_then(|idx| self.identities.get(idx))
    }

    /// Every descriptor-bearing identity, in subject order.
    pub fn faces(&self) -> impl Iterator<Item = (Subject, &Descriptor)> + '_ {
        self.faces.iter().filter_map(|(idx, descriptor)| {
            self.identities.get(*idx).map(|identity| (identity.subject, descriptor))
        })
    }

    /// Look up an already-normalized code in the physical index.
    pub fn lookup_physical(&self, code: &str) -> Option<&EnrolledIdentity> {
        self.physical.get(code).and_then(|idx| self.identities.get(*idx))
    }

    /// Look up an already-normalized code in the virtual index.
    pub fn lookup_virtual(&self, code: &str) -> Option<&EnrolledIdentity> {
        self.virtual_codes.get(code).and_then(|idx| self.identities.get(*idx))
    }

    fn build(generation: u64, mut records: Vec<EnrolledIdentity>) -> (Self, RefreshSummary) {
        let mut summary = RefreshSummary {
            generation,
            ..Default::default()
        };

        // Stable sort keeps the store's order among duplicates, so "first wins".
        records.sort_by(|a, b| a.subject.cmp(&b.subject));
        let before = records.len();
        records.dedup_by(|later, earlier| {
            let dup = later.subject == earlier.subject;
            if dup {
                tracing::warn!(subject = %later.subject, "duplicate enrolled subject; keeping first record");
            }
            dup
        });
        summary.duplicates = before - records.len();

        let mut faces = Vec::new();
        let mut physical: HashMap<String, usize> = HashMap::new();
        let mut virtual_codes: HashMap<String, usize> = HashMap::new();

        for (idx, identity) in records.iter().enumerate() {
            if let Some(raw) = &identity.descriptor {
                match Descriptor::new(raw.clone()) {
                    Ok(descriptor) => faces.push((idx, descriptor)),
                    Err(e) => {
                        summary.invalid_descriptors += 1;
                        tracing::warn!(subject = %identity.subject, error = %e, "ignoring enrolled descriptor");
                    }
                }
            }

            if let Some(raw) = &identity.physical_rfid {
                index_code(&mut physical, raw, idx, identity.subject, "physical", &mut summary);
            }
        }

        // Virtual codes go second so collisions with physical codes can be dropped.
        for (idx, identity) in records.iter().enumerate() {
            let Some(raw) = &identity.virtual_rfid else {
                continue;
            };
            match normalize(raw) {
                Ok(code) if physical.contains_key(&code) => {
                    summary.rejected_codes += 1;
                    tracing::warn!(
                        subject = %identity.subject,
                        "virtual code collides with a physical code; ignoring virtual code"
                    );
                }
                _ => index_code(&mut virtual_codes, raw, idx, identity.subject, "virtual", &mut summary),
            }
        }

        summary.identities = records.len();
        summary.faces = faces.len();

        let snapshot = Self {
            generation,
            loaded_at: Some(Utc::now()),
            identities: records,
            faces,
            physical,
            virtual_codes,
        };
        (snapshot, summary)
    }
}

fn index_code(
    index: &mut HashMap<String, usize>,
    raw: &str,
    idx: usize,
    subject: Subject,
    kind: &'static str,
    summary: &mut RefreshSummary,
) {
    let code = match normalize(raw) {
        Ok(code) => code,
        Err(e) => {
            summary.rejected_codes += 1;
            tracing::warn!(%subject, kind, error = %e, "ignoring enrolled code");
            return;
        }
    };
    match index.entry(code) {
        Entry::Vacant(slot) => {
            slot.insert(idx);
        }
        // Records are in subject order, so the occupant is the lower subject.
        Entry::Occupied(_) => {
            summary.rejected_codes += 1;
            tracing::warn!(%subject, kind, "code already registered to a lower subject; ignoring");
        }
    }
}

/// Counts from one registry refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub generation: u64,
    pub identities: usize,
    pub faces: usize,
    pub duplicates: usize,
    pub invalid_descriptors: usize,
    pub rejected_codes: usize,
    /// A refresh that started later finished first; this set was discarded.
    pub superseded: bool,
}

/// Holder of the current snapshot. Shared between the refresh task and the arbiter.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    next_generation: AtomicU64,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the whole enrolled set.
    ///
    /// Generations are handed out in call order. When two refreshes overlap,
    /// the one that started later wins even if it finishes first.
    pub fn replace(&self, records: Vec<EnrolledIdentity>) -> RefreshSummary {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (snapshot, mut summary) = RegistrySnapshot::build(generation, records);

        if !self.install(Arc::new(snapshot)) {
            summary.superseded = true;
            tracing::debug!(generation, "newer registry snapshot already installed; discarding");
            return summary;
        }

        tracing::debug!(
            generation,
            identities = summary.identities,
            faces = summary.faces,
            "registry snapshot replaced"
        );
        summary
    }

    /// Swap in `snapshot` unless the current one is newer.
    fn install(&self, snapshot: Arc<RegistrySnapshot>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if snapshot.generation <= guard.generation {
            return false;
        }
        *guard = snapshot;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IdentityStatus, DESCRIPTOR_DIM};

    fn record(subject: Subject) -> EnrolledIdentity {
        EnrolledIdentity {
            subject,
            display_name: subject.to_string(),
            descriptor: None,
            physical_rfid: None,
            virtual_rfid: None,
            face_enabled: true,
            physical_rfid_enabled: true,
            virtual_rfid_enabled: true,
            status: IdentityStatus::Active,
            valid_from: None,
            valid_until: None,
        }
    }

    #[test]
    fn test_empty_registry_snapshot() {
        let registry = DescriptorRegistry::new();
        let snap = registry.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.generation(), 0);
        assert_eq!(snap.faces().count(), 0);
    }

    #[test]
    fn test_replace_swaps_whole_set() {
        let registry = DescriptorRegistry::new();
        registry.replace(vec![record(Subject::Person(1)), record(Subject::Person(2))]);
        let old = registry.snapshot();
        let summary = registry.replace(vec![record(Subject::Person(3))]);

        assert_eq!(summary.generation, 2);
        assert_eq!(old.len(), 2);
        let new = registry.snapshot();
        assert_eq!(new.len(), 1);
        assert!(new.identity(Subject::Person(1)).is_none());
        assert!(new.identity(Subject::Person(3)).is_some());
    }

    #[test]
    fn test_older_snapshot_never_overwrites_newer() {
        let registry = DescriptorRegistry::new();
        let (older, _) = RegistrySnapshot::build(1, vec![record(Subject::Person(1)), record(Subject::Person(2))]);
        let (newer, _) = RegistrySnapshot::build(2, vec![record(Subject::Person(3))]);

        assert!(registry.install(Arc::new(newer)));
        assert!(!registry.install(Arc::new(older)));

        let snap = registry.snapshot();
        assert_eq!(snap.generation(), 2);
        assert_eq!(snap.len(), 1);
        assert!(snap.identity(Subject::Person(3)).is_some());
    }

    #[test]
    fn test_concurrent_replace_keeps_latest_generation() {
        let registry = Arc::new(DescriptorRegistry::new());
        let threads: Vec<_> = (0..8u64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    // Uneven sizes so builds finish out of order.
                    let records = (0..(8 - i) * 2_000).map(|n| record(Subject::Person(n))).collect();
                    registry.replace(records)
                })
            })
            .collect();
        let summaries: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        let latest = summaries.iter().map(|s| s.generation).max().unwrap();
        assert_eq!(latest, 8);
        let winner = summaries.iter().find(|s| s.generation == latest).unwrap();
        assert!(!winner.superseded);

        let snap = registry.snapshot();
        assert_eq!(snap.generation(), latest);
        assert_eq!(snap.len(), winner.identities);
    }

    #[test]
    fn test_duplicate_subject_keeps_first() {
        let mut first = record(Subject::Person(5));
        first.display_name = "first".into();
        let mut second = record(Subject::Person(5));
        second.display_name = "second".into();

        let registry = DescriptorRegistry::new();
        let summary = registry.replace(vec![first, second]);
        assert_eq!(summary.duplicates, 1);
        let snap = registry.snapshot();
        assert_eq!(snap.identity(Subject::Person(5)).unwrap().display_name, "first");
    }

    #[test]
    fn test_invalid_descriptor_keeps_credentials() {
        let mut r = record(Subject::Person(1));
        r.descriptor = Some(vec![0.1; 12]);
        r.physical_rfid = Some("ab12cd34".into());

        let registry = DescriptorRegistry::new();
        let summary = registry.replace(vec![r]);
        assert_eq!(summary.invalid_descriptors, 1);
        let snap = registry.snapshot();
        assert_eq!(snap.face_count(), 0);
        assert!(snap.lookup_physical("AB12CD34").is_some());
    }

    #[test]
    fn test_faces_in_subject_order() {
        let mut b = record(Subject::Visitor(1));
        b.descriptor = Some(vec![0.0; DESCRIPTOR_DIM]);
        let mut a = record(Subject::Person(8));
        a.descriptor = Some(vec![0.0; DESCRIPTOR_DIM]);

        let registry = DescriptorRegistry::new();
        registry.replace(vec![b, a]);
        let snap = registry.snapshot();
        let order: Vec<Subject> = snap.faces().map(|(s, _)| s).collect();
        assert_eq!(order, vec![Subject::Person(8), Subject::Visitor(1)]);
    }

    #[test]
    fn test_shared_code_goes_to_lowest_subject() {
        let mut hi = record(Subject::Person(9));
        hi.physical_rfid = Some("CARD0001".into());
        let mut lo = record(Subject::Person(2));
        lo.physical_rfid = Some("card0001".into());

        let registry = DescriptorRegistry::new();
        let summary = registry.replace(vec![hi, lo]);
        assert_eq!(summary.rejected_codes, 1);
        let snap = registry.snapshot();
        assert_eq!(snap.lookup_physical("CARD0001").unwrap().subject, Subject::Person(2));
    }

    #[test]
    fn test_virtual_code_colliding_with_physical_is_dropped() {
        let mut p = record(Subject::Person(1));
        p.physical_rfid = Some("UID: 0A1B2C".into());
        let mut v = record(Subject::Visitor(1));
        v.virtual_rfid = Some("0a1b2c".into());

        let registry = DescriptorRegistry::new();
        let summary = registry.replace(vec![p, v]);
        assert_eq!(summary.rejected_codes, 1);
        let snap = registry.snapshot();
        assert!(snap.lookup_virtual("0A1B2C").is_none());
        assert_eq!(snap.lookup_physical("0A1B2C").unwrap().subject, Subject::Person(1));
    }

    #[test]
    fn test_short_enrolled_code_is_ignored() {
        let mut r = record(Subject::Person(1));
        r.virtual_rfid = Some("AB".into());
        let registry = DescriptorRegistry::new();
        let summary = registry.replace(vec![r]);
        assert_eq!(summary.rejected_codes, 1);
    }
}
