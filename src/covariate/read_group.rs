use ahash::AHashMap;
use parking_lot::RwLock;

use super::{Covariate, CovariateKind, ReadCovariates};
use crate::read::RecalRead;

/// Number of bits reserved for read group identifiers
pub const READ_GROUP_BITS: u32 = 15;

/// Maximum number of distinct read groups one run can intern
pub const MAX_READ_GROUPS: usize = 1 << READ_GROUP_BITS;

#[derive(Debug, Default)]
struct Interner {
    ids: AHashMap<String, u64>,
    names: Vec<String>,
}

/// Read group identity, interned to small integers
///
/// The name-to-id map belongs to this covariate instance, and so to the tables
/// of one run. Identifiers are handed out in first-seen order; two runs may
/// assign different ids to the same name, which is why merges translate read
/// group keys through their names.
#[derive(Debug, Default)]
pub struct ReadGroupCovariate {
    interner: RwLock<Interner>,
}
impl ReadGroupCovariate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier of `name`, interning it on first use
    ///
    /// Returns `None` once [`MAX_READ_GROUPS`] names are interned.
    pub fn id_for(&self, name: &str) -> Option<u64> {
        if let Some(id) = self.interner.read().ids.get(name) {
            return Some(*id);
        }
        let mut interner = self.interner.write();
        // another writer may have interned the name in between
        if let Some(id) = interner.ids.get(name) {
            return Some(*id);
        }
        if interner.names.len() >= MAX_READ_GROUPS {
            return None;
        }
        let id = interner.names.len() as u64;
        interner.names.push(name.to_string());
        interner.ids.insert(name.to_string(), id);
        Some(id)
    }

    /// Returns the identifier of `name` without interning it
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.interner.read().ids.get(name).copied()
    }

    /// Returns the name interned under `id`
    #[must_use]
    pub fn name_of(&self, id: u64) -> Option<String> {
        self.interner.read().names.get(id as usize).cloned()
    }

    /// All interned names in identifier order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.interner.read().names.clone()
    }

    #[must_use]
    pub fn num_read_groups(&self) -> usize {
        self.interner.read().names.len()
    }

    /// Records the identifier of an already interned read group, or no value
    /// for a name this covariate has never seen
    ///
    /// Unlike [`Covariate::record_values`] this never interns, so evaluating
    /// reads against a finished model leaves its read groups untouched.
    pub fn record_known_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let key = self.lookup(read.read_group());
        for offset in 0..read.len() {
            values.add_covariate(offset, index, key, key, key);
        }
    }
}
impl Covariate for ReadGroupCovariate {
    fn kind(&self) -> CovariateKind {
        CovariateKind::ReadGroup
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let key = self.id_for(read.read_group());
        for offset in 0..read.len() {
            values.add_covariate(offset, index, key, key, key);
        }
    }

    fn maximum_key_value(&self) -> u64 {
        MAX_READ_GROUPS as u64 - 1
    }

    fn format_key(&self, key: u64) -> String {
        self.name_of(key).unwrap_or_else(|| key.to_string())
    }

    /// Looks up an already interned name; parsing never interns
    fn key_from_value(&self, value: &str) -> Option<u64> {
        self.lookup(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::event::EventType;
    use crate::read::ReadObservation;

    #[test]
    fn test_interning_is_stable() {
        let covariate = ReadGroupCovariate::new();
        assert_eq!(covariate.id_for("a"), Some(0));
        assert_eq!(covariate.id_for("b"), Some(1));
        assert_eq!(covariate.id_for("a"), Some(0));
        assert_eq!(covariate.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(covariate.lookup("c"), None);
    }

    #[test]
    fn test_format_key() {
        let covariate = ReadGroupCovariate::new();
        assert_eq!(covariate.key_from_value("lane1"), None);
        let key = covariate.id_for("lane1").unwrap();
        assert_eq!(covariate.key_from_value("lane1"), Some(key));
        assert_eq!(covariate.format_key(key), "lane1");
        assert_eq!(covariate.format_key(99), "99");
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(ReadGroupCovariate::new().bits_required(), READ_GROUP_BITS);
    }

    #[test]
    fn test_record_values() {
        let covariate = ReadGroupCovariate::new();
        covariate.id_for("other");
        let read = ReadObservation::builder("rg", b"ACG".to_vec(), vec![30; 3])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(read.len(), 1);
        covariate.record_values(&read, &mut values, 0);
        for offset in 0..3 {
            for event in EventType::ALL {
                assert_eq!(values.values(offset, event), &[Some(1)]);
            }
        }
    }

    #[test]
    fn test_record_known_values_never_interns() {
        let covariate = ReadGroupCovariate::new();
        covariate.id_for("known");
        let unseen = ReadObservation::builder("unseen", b"AC".to_vec(), vec![30; 2])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(unseen.len(), 1);
        covariate.record_known_values(&unseen, &mut values, 0);
        assert_eq!(values.values(0, EventType::Substitution), &[None]);
        assert_eq!(covariate.num_read_groups(), 1);

        let known = ReadObservation::builder("known", b"AC".to_vec(), vec![30; 2])
            .build()
            .unwrap();
        covariate.record_known_values(&known, &mut values, 0);
        assert_eq!(values.values(1, EventType::Deletion), &[Some(0)]);
    }

    #[test]
    fn test_concurrent_interning() {
        let covariate = Arc::new(ReadGroupCovariate::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let covariate = covariate.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|i| covariate.id_for(&format!("rg{i}")).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(covariate.num_read_groups(), 100);
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
    }
}
