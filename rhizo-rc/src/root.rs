//! Root identity and record
//!
//! A [`Root`] is one physical root's current known state inside a tube. Two
//! observations refer to the same root iff their [`RootIdentity`] values are
//! equal (exact match on name, location and birth session).
//!
//! Values copied from records live in schema-assigned slots and are read back
//! through [`Root::get`] with a [`FieldKey`] resolved once from the schema.
//! Derived attributes (status, anomaly, censoring, highest order, tip counts,
//! dates) are typed fields written only by the tube registry.

use crate::fields::{DataField, DerivedField, FieldKey, FieldSchema, IdentityField, Propagation};
use crate::source::Record;
use crate::tube::TubeNumber;
use rhizo_common::{Error, FieldValue, Result};
use std::fmt;

/// Identifies one physical root across all sessions in a tube
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootIdentity {
    pub name: String,
    pub location: String,
    pub birth_session: u32,
}

impl RootIdentity {
    pub fn new(name: impl Into<String>, location: impl Into<String>, birth_session: u32) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            birth_session,
        }
    }

    /// Read name, location and birth session from a record
    pub fn from_record(record: &Record) -> Result<Self> {
        let name = record.require(IdentityField::RootName.label())?.key();
        let location = record.require(IdentityField::Location.label())?.key();
        let birth_session = parse_session(record, IdentityField::BirthSession.label())?;
        Ok(Self::new(name, location, birth_session))
    }

    /// Birth cohort this root belongs to
    pub fn tip_identity(&self) -> TipIdentity {
        TipIdentity::new(self.birth_session, self.location.clone())
    }
}

impl fmt::Display for RootIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.name, self.location, self.birth_session
        )
    }
}

/// A (session, location) pair
///
/// As a root's tip identity the session is its birth session; the same key
/// type addresses death-session buckets in the tip statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TipIdentity {
    pub session: u32,
    pub location: String,
}

impl TipIdentity {
    pub fn new(session: u32, location: impl Into<String>) -> Self {
        Self {
            session,
            location: location.into(),
        }
    }
}

impl fmt::Display for TipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.session, self.location)
    }
}

/// Living-status code, stored as the first letter of the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivingStatus {
    Alive,
    Gone,
    Dead,
}

impl LivingStatus {
    /// Classify status text by its first non-whitespace character
    pub fn from_status_text(text: &str) -> Option<Self> {
        match text.trim_start().chars().next() {
            Some('A') => Some(LivingStatus::Alive),
            Some('G') => Some(LivingStatus::Gone),
            Some('D') => Some(LivingStatus::Dead),
            _ => None,
        }
    }

    pub fn is_alive(self) -> bool {
        matches!(self, LivingStatus::Alive)
    }

    pub fn code(self) -> char {
        match self {
            LivingStatus::Alive => 'A',
            LivingStatus::Gone => 'G',
            LivingStatus::Dead => 'D',
        }
    }
}

/// Session at which a root was last seen non-alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GoneSession {
    /// Not observed non-alive (yet)
    #[default]
    Unset,
    /// Finalized alive; reported as the `0` sentinel
    Never,
    At(u32),
}

impl GoneSession {
    /// The death session, if the root died
    pub fn session(self) -> Option<u32> {
        match self {
            GoneSession::At(session) => Some(session),
            _ => None,
        }
    }

    pub fn value(self) -> FieldValue {
        match self {
            GoneSession::Unset => FieldValue::Empty,
            GoneSession::Never => FieldValue::Int(0),
            GoneSession::At(session) => FieldValue::from(session),
        }
    }
}

/// One physical root's state
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    identity: RootIdentity,
    tip_identity: TipIdentity,
    tube: Option<TubeNumber>,
    session: u32,
    last_session: u32,
    status: LivingStatus,
    gone_session: GoneSession,
    anomaly: bool,
    censored: Option<bool>,
    highest_order: FieldValue,
    tips_alive_at_birth: Option<i64>,
    tips_alive_at_gone: Option<i64>,
    birth_date: FieldValue,
    gone_date: FieldValue,
    values: Vec<FieldValue>,
    synthesis: [FieldValue; 2],
}

/// A root built from one record, plus the `AtFinal` values it carried
///
/// Deferred values are not part of the root until the tube finalizes it from
/// a terminal-session observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RootObservation {
    pub root: Root,
    deferred: Vec<(usize, FieldValue)>,
}

impl RootObservation {
    pub fn deferred(&self) -> &[(usize, FieldValue)] {
        &self.deferred
    }
}

impl Root {
    /// Build a root from one observation record
    ///
    /// A row reporting a tip count other than 1 is anomalous and forced alive
    /// without looking at its status text. Otherwise the status text must
    /// start with `A`, `G` or `D`; a non-alive row sets the gone session to
    /// the row's session.
    ///
    /// # Errors
    /// Returns `Error::Data` for a missing required label, an unparseable
    /// session or tip count, or unrecognized status text.
    pub fn from_record(record: &Record, schema: &FieldSchema) -> Result<RootObservation> {
        let identity = RootIdentity::from_record(record)?;
        let session = parse_session(record, DataField::Session.label())?;

        let tips = record.require(DataField::NumberOfTips.label())?;
        let anomaly = if tips.is_empty() {
            true
        } else {
            match tips.as_i64() {
                Some(count) => count != 1,
                None => {
                    return Err(Error::Data(format!(
                        "Unreadable tip count {:?} for root {}",
                        tips, identity
                    )))
                }
            }
        };

        let (status, gone_session) = if anomaly {
            (LivingStatus::Alive, GoneSession::Unset)
        } else {
            let raw = record.require(DataField::TipLivStatus.label())?;
            let status = raw
                .as_text()
                .and_then(LivingStatus::from_status_text)
                .ok_or_else(|| {
                    Error::Data(format!(
                        "Unrecognized living status {:?} for root {}",
                        raw.to_string(),
                        identity
                    ))
                })?;
            if status.is_alive() {
                (status, GoneSession::Unset)
            } else {
                (status, GoneSession::At(session))
            }
        };

        let mut values = vec![FieldValue::Empty; schema.captured().len()];
        let mut deferred = Vec::new();
        for (slot, spec) in schema.captured().iter().enumerate() {
            let value = if spec.required {
                record.require(&spec.label)?.clone()
            } else {
                record.get(&spec.label).cloned().unwrap_or_default()
            };
            match spec.propagation {
                Propagation::AtBirth => values[slot] = value,
                Propagation::AtFinal => deferred.push((slot, value)),
            }
        }

        let tip_identity = identity.tip_identity();
        Ok(RootObservation {
            root: Root {
                identity,
                tip_identity,
                tube: None,
                session,
                last_session: session,
                status,
                gone_session,
                anomaly,
                censored: None,
                highest_order: FieldValue::Empty,
                tips_alive_at_birth: None,
                tips_alive_at_gone: None,
                birth_date: FieldValue::Empty,
                gone_date: FieldValue::Empty,
                values,
                synthesis: Default::default(),
            },
            deferred,
        })
    }

    pub fn identity(&self) -> &RootIdentity {
        &self.identity
    }

    pub fn tip_identity(&self) -> &TipIdentity {
        &self.tip_identity
    }

    pub fn location(&self) -> &str {
        &self.identity.location
    }

    pub fn tube(&self) -> Option<&TubeNumber> {
        self.tube.as_ref()
    }

    /// Session of the observation this record was built from
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Latest session at which this root was observed
    pub fn last_session(&self) -> u32 {
        self.last_session
    }

    pub fn birth_session(&self) -> u32 {
        self.identity.birth_session
    }

    pub fn status(&self) -> LivingStatus {
        self.status
    }

    pub fn gone_session(&self) -> GoneSession {
        self.gone_session
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly
    }

    /// `Some(true)` once finalized alive, `Some(false)` once finalized dead
    pub fn censored(&self) -> Option<bool> {
        self.censored
    }

    pub fn is_finalized(&self) -> bool {
        self.censored.is_some()
    }

    pub fn order(&self) -> &FieldValue {
        &self.values[DataField::Order.slot()]
    }

    pub fn highest_order(&self) -> &FieldValue {
        &self.highest_order
    }

    pub fn avg_diameter(&self) -> &FieldValue {
        &self.values[DataField::AvgDiameter.slot()]
    }

    pub fn tips_alive_at_birth(&self) -> Option<i64> {
        self.tips_alive_at_birth
    }

    pub fn tips_alive_at_gone(&self) -> Option<i64> {
        self.tips_alive_at_gone
    }

    /// Current value of a field
    pub fn get(&self, key: FieldKey) -> FieldValue {
        match key {
            FieldKey::Captured(slot) => self.values.get(slot).cloned().unwrap_or_default(),
            FieldKey::Synthesis(field) => self.synthesis[field as usize].clone(),
            FieldKey::Derived(field) => self.derived(field),
        }
    }

    /// Value of a field by label, or `default` when unknown or empty
    pub fn get_or(&self, schema: &FieldSchema, name: &str, default: FieldValue) -> FieldValue {
        match schema.resolve(name).map(|key| self.get(key)) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    /// Overwrite a data, custom or synthesis field
    ///
    /// # Errors
    /// Identity fields are immutable and derived attributes belong to the
    /// reconciliation algorithms; both are rejected with `Error::Config`.
    pub fn set(&mut self, key: FieldKey, value: FieldValue) -> Result<()> {
        match key {
            FieldKey::Captured(slot) if slot < IdentityField::ALL.len() => Err(Error::Config(
                format!("Identity field slot {} of root {} is immutable", slot, self.identity),
            )),
            FieldKey::Captured(slot) => match self.values.get_mut(slot) {
                Some(existing) => {
                    *existing = value;
                    Ok(())
                }
                None => Err(Error::NotFound(format!("Field slot {} on root {}", slot, self.identity))),
            },
            FieldKey::Synthesis(field) => {
                self.synthesis[field as usize] = value;
                Ok(())
            }
            FieldKey::Derived(field) => Err(Error::Config(format!(
                "Derived attribute {} cannot be set directly",
                field.label()
            ))),
        }
    }

    fn derived(&self, field: DerivedField) -> FieldValue {
        match field {
            DerivedField::Anomaly => FieldValue::Bool(self.anomaly),
            DerivedField::IsAlive => FieldValue::Text(self.status.code().to_string()),
            DerivedField::Censored => self.censored.map(|c| FieldValue::Int(i64::from(c))).into(),
            DerivedField::HighestOrder => self.highest_order.clone(),
            DerivedField::GoneSession => self.gone_session.value(),
            DerivedField::TipsAliveAtBirth => self.tips_alive_at_birth.into(),
            DerivedField::TipsAliveAtGone => self.tips_alive_at_gone.into(),
            DerivedField::BirthDate => self.birth_date.clone(),
            DerivedField::BirthYear => year_of(&self.birth_date).into(),
            DerivedField::GoneDate => self.gone_date.clone(),
            DerivedField::GoneYear => year_of(&self.gone_date).into(),
        }
    }

    // Mutators used by the tube registry and orchestrator

    pub(crate) fn assign_tube(&mut self, tube: TubeNumber) {
        self.tube = Some(tube);
    }

    pub(crate) fn observe_session(&mut self, session: u32) {
        self.last_session = self.last_session.max(session);
    }

    /// Alive -> dead/gone: take the incoming status and death session
    pub(crate) fn mark_gone(&mut self, incoming: &Root) {
        self.status = incoming.status;
        self.gone_session = incoming.gone_session;
        let slot = DataField::DeathSession.slot();
        self.values[slot] = incoming.values[slot].clone();
    }

    /// Dead/gone -> alive: clear the death session
    pub(crate) fn resurrect(&mut self, status: LivingStatus) {
        self.status = status;
        self.gone_session = GoneSession::Unset;
        self.values[DataField::DeathSession.slot()] = FieldValue::Empty;
    }

    pub(crate) fn finalize_from(&mut self, terminal: &RootObservation, max_session: u32) -> bool {
        if terminal.root.session == max_session {
            self.highest_order = terminal.root.order().clone();
        }
        let censored = self.status.is_alive();
        if censored {
            self.gone_session = GoneSession::Never;
            self.values[DataField::DeathSession.slot()] = self.gone_session.value();
        }
        self.censored = Some(censored);
        for (slot, value) in &terminal.deferred {
            if let Some(existing) = self.values.get_mut(*slot) {
                *existing = value.clone();
            }
        }
        censored
    }

    pub(crate) fn set_tip_counts(&mut self, at_birth: i64, at_gone: Option<i64>) {
        self.tips_alive_at_birth = Some(at_birth);
        self.tips_alive_at_gone = at_gone;
    }

    pub(crate) fn set_dates(&mut self, birth: FieldValue, gone: FieldValue) {
        self.birth_date = birth;
        self.gone_date = gone;
    }
}

/// Parse a session-number field
pub(crate) fn parse_session(record: &Record, label: &str) -> Result<u32> {
    let value = record.require(label)?;
    value
        .as_i64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            Error::Data(format!(
                "Invalid session value {:?} in {} (record {})",
                value.to_string(),
                label,
                record.position()
            ))
        })
}

/// Year of a session date
///
/// Tries `%Y.%m.%d`, `%Y-%m-%d` and `%m/%d/%Y`, then falls back to the
/// leading digits before the first `.`.
pub fn year_of(date: &FieldValue) -> Option<i64> {
    use chrono::{Datelike, NaiveDate};

    let text = match date {
        FieldValue::Text(s) => s.trim(),
        _ => return None,
    };
    for format in ["%Y.%m.%d", "%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return Some(i64::from(parsed.year()));
        }
    }
    text.split('.')
        .next()
        .filter(|head| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
        .and_then(|head| head.parse().ok())
}
