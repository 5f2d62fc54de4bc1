//! Tip survivorship
//!
//! Counts, per (session, location), how many tips were born and how many were
//! lost, then walks each location's sessions in order to produce a running
//! total of tips still alive as of that session.

use crate::root::{Root, TipIdentity};
use rhizo_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Tip statistics for one tube
///
/// Computed from a read-only view of the roots; never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipStats {
    alive: BTreeMap<TipIdentity, i64>,
    gone: BTreeMap<TipIdentity, i64>,
    totals: BTreeMap<TipIdentity, i64>,
}

impl TipStats {
    pub fn compute<'a, I>(roots: I) -> Self
    where
        I: IntoIterator<Item = &'a Root>,
    {
        let mut alive: BTreeMap<TipIdentity, i64> = BTreeMap::new();
        let mut gone: BTreeMap<TipIdentity, i64> = BTreeMap::new();

        for root in roots {
            *alive.entry(root.tip_identity().clone()).or_default() += 1;
            if let Some(session) = root.gone_session().session() {
                *gone
                    .entry(TipIdentity::new(session, root.location()))
                    .or_default() -= 1;
            }
        }

        // Sessions seen per location, sorted and unique
        let mut sessions: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
        for key in alive.keys().chain(gone.keys()) {
            sessions
                .entry(key.location.as_str())
                .or_default()
                .insert(key.session);
        }

        let mut totals = BTreeMap::new();
        for (location, location_sessions) in &sessions {
            let mut running = 0;
            for &session in location_sessions {
                let key = TipIdentity::new(session, *location);
                running += alive.get(&key).copied().unwrap_or(0);
                running += gone.get(&key).copied().unwrap_or(0);
                totals.insert(key, running);
            }
        }

        Self { alive, gone, totals }
    }

    /// Tips still alive at a (session, location)
    pub fn total(&self, key: &TipIdentity) -> Option<i64> {
        self.totals.get(key).copied()
    }

    /// Births per (birth session, location)
    pub fn alive_counts(&self) -> &BTreeMap<TipIdentity, i64> {
        &self.alive
    }

    /// Losses per (death session, location), as negative counts
    pub fn gone_counts(&self) -> &BTreeMap<TipIdentity, i64> {
        &self.gone
    }

    pub fn totals(&self) -> &BTreeMap<TipIdentity, i64> {
        &self.totals
    }

    /// Running total at the root's birth cohort
    ///
    /// # Errors
    /// A miss means the stats were computed over a different root set; it is
    /// returned as `Error::Data`.
    pub fn alive_tips_at_birth(&self, root: &Root) -> Result<i64> {
        self.total(root.tip_identity()).ok_or_else(|| {
            Error::Data(format!(
                "No tip statistics for birth cohort {} of root {}",
                root.tip_identity(),
                root.identity()
            ))
        })
    }

    /// Running total at the root's death session, if it died
    pub fn alive_tips_at_gone(&self, root: &Root) -> Result<Option<i64>> {
        let Some(session) = root.gone_session().session() else {
            return Ok(None);
        };
        let key = TipIdentity::new(session, root.location());
        self.total(&key).map(Some).ok_or_else(|| {
            Error::Data(format!(
                "No tip statistics for death cohort {} of root {}",
                key,
                root.identity()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldSchema;
    use crate::source::Record;
    use crate::tube::{Tube, TubeNumber};
    use rhizo_common::FieldValue;

    fn observe(name: &str, location: &str, birth: i64, session: i64, status: &str) -> Root {
        let schema = FieldSchema::new().unwrap();
        let record = Record::from_pairs(
            0,
            [
                ("RootName", FieldValue::from(name)),
                ("Location#", FieldValue::from(location)),
                ("BirthSession", FieldValue::Int(birth)),
                ("Tube#", FieldValue::Int(1)),
                ("Session#", FieldValue::Int(session)),
                ("DeathSession", FieldValue::Empty),
                ("TipLivStatus", FieldValue::from(status)),
                ("NumberOfTips", FieldValue::Int(1)),
                ("Date", FieldValue::Empty),
                ("Order", FieldValue::Int(1)),
            ],
        );
        Root::from_record(&record, &schema).unwrap().root
    }

    #[test]
    fn test_births_only_total_equals_cohort_size() {
        let roots = vec![
            observe("A", "L1", 1, 1, "Alive"),
            observe("B", "L1", 1, 1, "Alive"),
            observe("C", "L1", 1, 1, "Alive"),
        ];
        let stats = TipStats::compute(&roots);
        assert_eq!(stats.total(&TipIdentity::new(1, "L1")), Some(3));
        assert!(stats.gone_counts().is_empty());
    }

    #[test]
    fn test_running_total_nets_births_and_deaths() {
        let mut tube = Tube::new(TubeNumber::new("1"));
        tube.insert_or_update(observe("A", "L1", 1, 1, "Alive"));
        tube.insert_or_update(observe("A", "L1", 1, 2, "Gone"));
        tube.insert_or_update(observe("B", "L1", 2, 2, "Alive"));

        let stats = TipStats::compute(tube.roots());
        assert_eq!(stats.alive_counts().get(&TipIdentity::new(1, "L1")), Some(&1));
        assert_eq!(stats.gone_counts().get(&TipIdentity::new(2, "L1")), Some(&-1));
        assert_eq!(stats.total(&TipIdentity::new(1, "L1")), Some(1));
        assert_eq!(stats.total(&TipIdentity::new(2, "L1")), Some(1));
    }

    #[test]
    fn test_locations_are_independent() {
        let roots = vec![
            observe("A", "L1", 1, 1, "Alive"),
            observe("B", "L2", 2, 2, "Alive"),
            observe("C", "L2", 3, 3, "Dead"),
        ];
        let stats = TipStats::compute(&roots);
        assert_eq!(stats.total(&TipIdentity::new(1, "L1")), Some(1));
        assert_eq!(stats.total(&TipIdentity::new(2, "L2")), Some(1));
        // C is born and lost at session 3
        assert_eq!(stats.total(&TipIdentity::new(3, "L2")), Some(1));
        assert_eq!(stats.total(&TipIdentity::new(2, "L1")), None);
    }

    #[test]
    fn test_lookups_per_root() {
        let mut tube = Tube::new(TubeNumber::new("1"));
        tube.insert_or_update(observe("A", "L1", 1, 1, "Alive"));
        tube.insert_or_update(observe("B", "L1", 1, 1, "Alive"));
        tube.insert_or_update(observe("A", "L1", 1, 3, "Gone"));
        let stats = TipStats::compute(tube.roots());

        let a = tube.roots().find(|r| r.identity().name == "A").unwrap();
        let b = tube.roots().find(|r| r.identity().name == "B").unwrap();
        assert_eq!(stats.alive_tips_at_birth(a).unwrap(), 2);
        assert_eq!(stats.alive_tips_at_gone(a).unwrap(), Some(1));
        assert_eq!(stats.alive_tips_at_gone(b).unwrap(), None);
    }

    #[test]
    fn test_lookup_miss_is_data_error() {
        let stats = TipStats::compute(&[observe("A", "L1", 1, 1, "Alive")]);
        let stranger = observe("Z", "L9", 4, 4, "Alive");
        assert!(matches!(stats.alive_tips_at_birth(&stranger), Err(Error::Data(_))));
    }
}
