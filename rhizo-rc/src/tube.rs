//! Tube registry
//!
//! A [`Tube`] owns the reconciled roots of one physical tube. Observations are
//! fed through [`Tube::insert_or_update`] in non-decreasing session order;
//! once every session has been ingested, each terminal-session observation is
//! passed to [`Tube::finalize`].
//!
//! # Reconciliation rules
//! - New identity → append
//! - Existing alive, incoming dead/gone → take incoming status and death session
//! - Existing dead/gone, incoming alive → clear death session, status alive
//! - Same polarity → no change
//!
//! A root that was anomalous when first inserted is never moved to dead/gone.

use crate::fields::IdentityField;
use crate::root::{Root, RootIdentity, RootObservation};
use crate::source::Record;
use crate::tip_stats::TipStats;
use rhizo_common::{Error, FieldValue, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Tube number, normalized so `8`, `8.0` and `"8"` are the same tube
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TubeNumber(String);

impl TubeNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn from_value(value: &FieldValue) -> Self {
        Self(value.key())
    }

    /// Tube number of a record; empty or absent is a data error
    pub fn from_record(record: &Record) -> Result<Self> {
        let value = record.require(IdentityField::Tube.label())?;
        if value.is_empty() {
            return Err(Error::Data(format!(
                "Empty tube number (record {})",
                record.position()
            )));
        }
        Ok(Self::from_value(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TubeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What [`Tube::insert_or_update`] did with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// First observation of this identity
    Inserted,
    /// Alive → dead/gone
    Died,
    /// Dead/gone → alive
    Resurrected,
    /// Same polarity, nothing changed
    Unchanged,
    /// Dead/gone observation of an anomalous root, ignored
    AnomalyHeld,
}

/// One physical tube and its reconciled roots
#[derive(Debug, Clone)]
pub struct Tube {
    number: TubeNumber,
    roots: Vec<Root>,
    positions: HashMap<RootIdentity, usize>,
    max_session: u32,
    session_dates: BTreeMap<u32, FieldValue>,
    tip_stats: Option<TipStats>,
}

impl Tube {
    pub fn new(number: TubeNumber) -> Self {
        Self {
            number,
            roots: Vec::new(),
            positions: HashMap::new(),
            max_session: 0,
            session_dates: BTreeMap::new(),
            tip_stats: None,
        }
    }

    pub fn number(&self) -> &TubeNumber {
        &self.number
    }

    /// Highest session number recorded so far
    pub fn max_session(&self) -> u32 {
        self.max_session
    }

    /// Roots in insertion order
    pub fn roots(&self) -> std::slice::Iter<'_, Root> {
        self.roots.iter()
    }

    pub(crate) fn roots_mut(&mut self) -> std::slice::IterMut<'_, Root> {
        self.roots.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn get(&self, identity: &RootIdentity) -> Option<&Root> {
        self.positions.get(identity).map(|&i| &self.roots[i])
    }

    pub fn session_dates(&self) -> &BTreeMap<u32, FieldValue> {
        &self.session_dates
    }

    pub fn session_date(&self, session: u32) -> Option<&FieldValue> {
        self.session_dates.get(&session)
    }

    pub fn tip_stats(&self) -> Option<&TipStats> {
        self.tip_stats.as_ref()
    }

    /// Note that `session` was observed on `date`
    ///
    /// Raises the maximum session; the first date seen for a session is kept,
    /// even when it is empty.
    pub fn record_session(&mut self, session: u32, date: &FieldValue) {
        if session > self.max_session {
            self.max_session = session;
            debug!(tube = %self.number, session, "Max session updated");
        }
        if !self.session_dates.contains_key(&session) {
            self.session_dates.insert(session, date.clone());
            debug!(tube = %self.number, session, date = %date, "Recorded session date");
        }
    }

    /// Merge one observation into the tube
    pub fn insert_or_update(&mut self, mut root: Root) -> Reconciliation {
        let Some(&i) = self.positions.get(root.identity()) else {
            debug!(tube = %self.number, root = %root.identity(), "Adding root to tube");
            root.assign_tube(self.number.clone());
            self.positions.insert(root.identity().clone(), self.roots.len());
            self.roots.push(root);
            return Reconciliation::Inserted;
        };

        let existing = &mut self.roots[i];
        existing.observe_session(root.session());

        match (existing.status().is_alive(), root.status().is_alive()) {
            (true, false) if existing.is_anomaly() => {
                debug!(
                    root = %existing.identity(),
                    session = root.session(),
                    "Ignoring dead/gone observation of anomalous root"
                );
                Reconciliation::AnomalyHeld
            }
            (true, false) => {
                debug!(root = %existing.identity(), session = root.session(), "Changing root from alive to gone");
                existing.mark_gone(&root);
                Reconciliation::Died
            }
            (false, true) => {
                debug!(root = %existing.identity(), session = root.session(), "Changing root from gone to alive");
                existing.resurrect(root.status());
                Reconciliation::Resurrected
            }
            _ => Reconciliation::Unchanged,
        }
    }

    /// Finalize the root matching a terminal-session observation
    ///
    /// Stamps highest order when the observation is from the maximum session,
    /// sets censoring (alive → censored with the `0` death-session sentinel,
    /// dead/gone → not censored) and copies `AtFinal` custom fields.
    ///
    /// Returns whether the root ended censored.
    ///
    /// # Errors
    /// Returns `Error::NotFound` if no root with this identity is in the tube.
    pub fn finalize(&mut self, observation: &RootObservation) -> Result<bool> {
        let identity = observation.root.identity();
        let &i = self.positions.get(identity).ok_or_else(|| {
            Error::NotFound(format!(
                "Root {} is not in tube {}",
                identity, self.number
            ))
        })?;
        Ok(self.roots[i].finalize_from(observation, self.max_session))
    }

    /// Roots that were not finalized (last observed before the terminal session)
    pub fn unfinalized(&self) -> impl Iterator<Item = &Root> {
        self.roots.iter().filter(|root| !root.is_finalized())
    }

    /// Annotate every root with its tip counts and keep the statistics
    ///
    /// # Errors
    /// Returns `Error::Data` when a root's birth or death bucket is missing
    /// from `stats`; no root is modified in that case.
    pub fn apply_tip_stats(&mut self, stats: TipStats) -> Result<()> {
        let mut counts = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            counts.push((stats.alive_tips_at_birth(root)?, stats.alive_tips_at_gone(root)?));
        }
        for (root, (at_birth, at_gone)) in self.roots.iter_mut().zip(counts) {
            root.set_tip_counts(at_birth, at_gone);
        }
        self.tip_stats = Some(stats);
        Ok(())
    }

    /// Copy birth and death dates from the session index onto each root
    ///
    /// Death dates are only written for roots finalized as not censored.
    pub fn annotate_dates(&mut self) {
        for root in self.roots.iter_mut() {
            let birth = self
                .session_dates
                .get(&root.birth_session())
                .cloned()
                .unwrap_or_default();
            if birth.is_empty() {
                warn!(root = %root.identity(), session = root.birth_session(), "No date recorded for birth session");
            }
            let gone = match (root.censored(), root.gone_session().session()) {
                (Some(false), Some(session)) => {
                    self.session_dates.get(&session).cloned().unwrap_or_default()
                }
                _ => FieldValue::Empty,
            };
            root.set_dates(birth, gone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{DataField, DerivedField, FieldSchema};
    use crate::root::{GoneSession, LivingStatus};
    use std::collections::BTreeMap as Map;

    fn observe(
        schema: &FieldSchema,
        name: &str,
        birth: i64,
        session: i64,
        status: &str,
        tips: i64,
        order: i64,
    ) -> RootObservation {
        let record = Record::from_pairs(
            0,
            [
                ("RootName", FieldValue::from(name)),
                ("Location#", FieldValue::from("Loc1")),
                ("BirthSession", FieldValue::Int(birth)),
                ("Tube#", FieldValue::Int(1)),
                ("Session#", FieldValue::Int(session)),
                ("DeathSession", FieldValue::Empty),
                ("TipLivStatus", FieldValue::from(status)),
                ("NumberOfTips", FieldValue::Int(tips)),
                ("Date", FieldValue::from(format!("2003.0{}.01", session))),
                ("Order", FieldValue::Int(order)),
            ],
        );
        Root::from_record(&record, schema).unwrap()
    }

    fn tube() -> Tube {
        Tube::new(TubeNumber::new("1"))
    }

    #[test]
    fn test_insert_assigns_tube() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        let obs = observe(&schema, "A", 1, 1, "Alive", 1, 1);
        assert_eq!(tube.insert_or_update(obs.root), Reconciliation::Inserted);
        assert_eq!(tube.len(), 1);
        let root = tube.roots().next().unwrap();
        assert_eq!(root.tube(), Some(&TubeNumber::new("1")));
    }

    #[test]
    fn test_same_identity_twice_is_idempotent() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        let first = observe(&schema, "A", 1, 1, "Alive", 1, 1);
        let again = observe(&schema, "A", 1, 1, "Alive", 1, 1);

        tube.insert_or_update(first.root);
        assert_eq!(tube.insert_or_update(again.root), Reconciliation::Unchanged);

        assert_eq!(tube.len(), 1);
        let root = tube.roots().next().unwrap();
        assert_eq!(root.gone_session(), GoneSession::Unset);
    }

    #[test]
    fn test_repeated_dead_observation_keeps_first_death_session() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        tube.insert_or_update(observe(&schema, "A", 1, 2, "Gone", 1, 1).root);
        assert_eq!(
            tube.insert_or_update(observe(&schema, "A", 1, 3, "Gone", 1, 1).root),
            Reconciliation::Unchanged
        );
        let root = tube.roots().next().unwrap();
        assert_eq!(root.gone_session(), GoneSession::At(2));
        assert_eq!(root.last_session(), 3);
    }

    #[test]
    fn test_death_then_resurrection() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        let id = RootIdentity::new("A", "Loc1", 1);

        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        assert_eq!(
            tube.insert_or_update(observe(&schema, "A", 1, 2, "Gone", 1, 1).root),
            Reconciliation::Died
        );
        let root = tube.get(&id).unwrap();
        assert_eq!(root.status(), LivingStatus::Gone);
        assert_eq!(root.gone_session(), GoneSession::At(2));

        assert_eq!(
            tube.insert_or_update(observe(&schema, "A", 1, 3, "Alive", 1, 1).root),
            Reconciliation::Resurrected
        );
        let root = tube.get(&id).unwrap();
        assert_eq!(root.status(), LivingStatus::Alive);
        assert_eq!(root.gone_session(), GoneSession::Unset);
    }

    #[test]
    fn test_later_observations_do_not_overwrite_order() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        tube.insert_or_update(observe(&schema, "A", 1, 2, "Alive", 1, 3).root);
        let root = tube.roots().next().unwrap();
        assert_eq!(root.order(), &FieldValue::Int(1));
    }

    #[test]
    fn test_anomalous_root_never_dies() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 3, 1).root);
        assert_eq!(
            tube.insert_or_update(observe(&schema, "A", 1, 2, "Gone", 1, 1).root),
            Reconciliation::AnomalyHeld
        );
        let root = tube.roots().next().unwrap();
        assert!(root.is_anomaly());
        assert!(root.status().is_alive());
        assert_eq!(root.gone_session(), GoneSession::Unset);
    }

    #[test]
    fn test_anomalous_observation_resurrects_dead_root() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Gone", 1, 1).root);
        assert_eq!(
            tube.insert_or_update(observe(&schema, "A", 1, 2, "Gone", 2, 1).root),
            Reconciliation::Resurrected
        );
        let root = tube.roots().next().unwrap();
        assert!(root.status().is_alive());
        assert!(!root.is_anomaly());
    }

    #[test]
    fn test_finalize_alive_root_is_censored() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.record_session(1, &FieldValue::from("2003.01.01"));
        tube.record_session(2, &FieldValue::from("2003.02.01"));
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        let terminal = observe(&schema, "A", 1, 2, "Alive", 1, 2);
        tube.insert_or_update(terminal.root.clone());

        assert!(tube.finalize(&terminal).unwrap());
        let root = tube.roots().next().unwrap();
        assert_eq!(root.censored(), Some(true));
        assert_eq!(root.gone_session(), GoneSession::Never);
        assert_eq!(root.get(DerivedField::GoneSession.into()), FieldValue::Int(0));
        assert_eq!(root.get(DataField::DeathSession.into()), FieldValue::Int(0));
        assert_eq!(root.highest_order(), &FieldValue::Int(2));
        assert_eq!(root.order(), &FieldValue::Int(1));
    }

    #[test]
    fn test_finalize_dead_root_not_censored() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.record_session(2, &FieldValue::from("2003.02.01"));
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        let terminal = observe(&schema, "A", 1, 2, "Dead", 1, 1);
        tube.insert_or_update(terminal.root.clone());

        assert!(!tube.finalize(&terminal).unwrap());
        let root = tube.roots().next().unwrap();
        assert_eq!(root.censored(), Some(false));
        assert_eq!(root.gone_session(), GoneSession::At(2));
        assert_eq!(root.get(DerivedField::IsAlive.into()), FieldValue::from("D"));
    }

    #[test]
    fn test_finalize_unknown_root_is_not_found() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        let stray = observe(&schema, "Z", 1, 1, "Alive", 1, 1);
        assert!(matches!(tube.finalize(&stray), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_finalize_copies_final_custom_fields() {
        let mut custom = Map::new();
        custom.insert("Notes".to_string(), "FINAL".to_string());
        let schema = FieldSchema::with_custom_fields(&custom).unwrap();
        let notes = schema.resolve("Notes").unwrap();

        let record = |session: i64, note: &str| {
            Record::from_pairs(
                0,
                [
                    ("RootName", FieldValue::from("A")),
                    ("Location#", FieldValue::from("Loc1")),
                    ("BirthSession", FieldValue::Int(1)),
                    ("Tube#", FieldValue::Int(1)),
                    ("Session#", FieldValue::Int(session)),
                    ("DeathSession", FieldValue::Empty),
                    ("TipLivStatus", FieldValue::from("Alive")),
                    ("NumberOfTips", FieldValue::Int(1)),
                    ("Date", FieldValue::Empty),
                    ("Order", FieldValue::Int(1)),
                    ("Notes", FieldValue::from(note)),
                ],
            )
        };

        let mut tube = tube();
        tube.record_session(2, &FieldValue::Empty);
        let first = Root::from_record(&record(1, "early"), &schema).unwrap();
        let terminal = Root::from_record(&record(2, "late"), &schema).unwrap();
        tube.insert_or_update(first.root);
        tube.insert_or_update(terminal.root.clone());
        assert_eq!(tube.roots().next().unwrap().get(notes), FieldValue::Empty);

        tube.finalize(&terminal).unwrap();
        assert_eq!(tube.roots().next().unwrap().get(notes), FieldValue::from("late"));
    }

    #[test]
    fn test_unfinalized_roots_reported() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.record_session(1, &FieldValue::Empty);
        tube.record_session(2, &FieldValue::Empty);
        tube.insert_or_update(observe(&schema, "Lost", 1, 1, "Alive", 1, 1).root);
        let terminal = observe(&schema, "Kept", 1, 2, "Alive", 1, 1);
        tube.insert_or_update(terminal.root.clone());
        tube.finalize(&terminal).unwrap();

        let lost: Vec<&Root> = tube.unfinalized().collect();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].identity().name, "Lost");
        assert_eq!(lost[0].censored(), None);
        assert_eq!(lost[0].get(DerivedField::Censored.into()), FieldValue::Empty);
    }

    #[test]
    fn test_record_session_first_date_wins() {
        let mut tube = tube();
        tube.record_session(1, &FieldValue::from("2003.05.12"));
        tube.record_session(1, &FieldValue::from("2003.05.13"));
        tube.record_session(3, &FieldValue::from("2003.07.01"));
        assert_eq!(tube.max_session(), 3);
        assert_eq!(tube.session_date(1), Some(&FieldValue::from("2003.05.12")));
    }

    #[test]
    fn test_record_session_keeps_first_empty_date() {
        let mut tube = tube();
        tube.record_session(2, &FieldValue::Empty);
        tube.record_session(2, &FieldValue::from("2003.06.01"));
        assert_eq!(tube.session_date(2), Some(&FieldValue::Empty));
    }

    #[test]
    fn test_annotate_dates() {
        let schema = FieldSchema::new().unwrap();
        let mut tube = tube();
        tube.record_session(1, &FieldValue::from("2003.01.01"));
        tube.record_session(2, &FieldValue::from("2004.02.01"));
        tube.insert_or_update(observe(&schema, "A", 1, 1, "Alive", 1, 1).root);
        let terminal = observe(&schema, "A", 1, 2, "Gone", 1, 1);
        tube.insert_or_update(terminal.root.clone());
        tube.finalize(&terminal).unwrap();
        tube.annotate_dates();

        let root = tube.roots().next().unwrap();
        assert_eq!(root.get(DerivedField::BirthDate.into()), FieldValue::from("2003.01.01"));
        assert_eq!(root.get(DerivedField::BirthYear.into()), FieldValue::Int(2003));
        assert_eq!(root.get(DerivedField::GoneDate.into()), FieldValue::from("2004.02.01"));
        assert_eq!(root.get(DerivedField::GoneYear.into()), FieldValue::Int(2004));
    }
}
