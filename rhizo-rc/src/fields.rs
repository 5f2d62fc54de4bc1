//! Field Schema
//!
//! Declares which labelled fields are extracted from observation records and
//! how they map onto a [`Root`](crate::root::Root):
//! - **Identity fields:** root name, location, birth session, tube number
//! - **Data fields:** session, death session, living status, tip count, date,
//!   order (required) and average diameter (optional)
//! - **Custom fields:** caller supplied, each tagged with a [`Propagation`]
//!
//! Labels arriving from the data source may contain characters such as `#`.
//! Every label is mapped to a sanitized attribute name once, when the schema
//! is built; lookups by label afterwards resolve to a [`FieldKey`] without any
//! string munging.

use once_cell::sync::Lazy;
use regex::Regex;
use rhizo_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{debug, info};

/// Character substituted for anything outside `[A-Za-z0-9_]`
pub const PLACEHOLDER: char = 'X';

/// Config value for [`Propagation::AtBirth`]
pub const ROOT_BIRTH: &str = "BIRTH";
/// Config value for [`Propagation::AtFinal`]
pub const ROOT_FINAL: &str = "FINAL";

static VALID_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid regex"));

/// Map an external field label onto a valid attribute name
///
/// Labels that are already valid identifiers are returned unchanged. Otherwise
/// every disallowed character becomes [`PLACEHOLDER`] and a leading digit gets
/// a placeholder prefix. The result is validated again; failure (only possible
/// for an empty label) is a configuration error.
pub fn sanitize_field_name(label: &str) -> Result<String> {
    if VALID_IDENTIFIER.is_match(label) {
        return Ok(label.to_string());
    }

    let placeholder = PLACEHOLDER.to_string();
    let mut attribute = INVALID_CHARS
        .replace_all(label, placeholder.as_str())
        .into_owned();
    if attribute.starts_with(|c: char| c.is_ascii_digit()) {
        attribute.insert(0, PLACEHOLDER);
    }

    if !VALID_IDENTIFIER.is_match(&attribute) {
        return Err(Error::Config(format!(
            "Unable to scrub field into a valid identifier [{}]",
            label
        )));
    }
    Ok(attribute)
}

/// When a custom field value is captured onto a root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// Captured once, from the observation where the root is first seen
    AtBirth,
    /// Captured during finalization, from the terminal-session observation
    AtFinal,
}

impl FromStr for Propagation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ROOT_BIRTH => Ok(Propagation::AtBirth),
            ROOT_FINAL => Ok(Propagation::AtFinal),
            other => Err(Error::Config(format!(
                "Unknown custom field propagation value [{}]",
                other
            ))),
        }
    }
}

/// Fields that together identify a physical root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    RootName,
    Location,
    BirthSession,
    Tube,
}

impl IdentityField {
    pub const ALL: [IdentityField; 4] = [
        IdentityField::RootName,
        IdentityField::Location,
        IdentityField::BirthSession,
        IdentityField::Tube,
    ];

    pub fn label(self) -> &'static str {
        match self {
            IdentityField::RootName => "RootName",
            IdentityField::Location => "Location#",
            IdentityField::BirthSession => "BirthSession",
            IdentityField::Tube => "Tube#",
        }
    }

    /// Storage slot on a root record
    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Per-observation data fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataField {
    Session,
    DeathSession,
    TipLivStatus,
    NumberOfTips,
    Date,
    Order,
    AvgDiameter,
}

impl DataField {
    pub const ALL: [DataField; 7] = [
        DataField::Session,
        DataField::DeathSession,
        DataField::TipLivStatus,
        DataField::NumberOfTips,
        DataField::Date,
        DataField::Order,
        DataField::AvgDiameter,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DataField::Session => "Session#",
            DataField::DeathSession => "DeathSession",
            DataField::TipLivStatus => "TipLivStatus",
            DataField::NumberOfTips => "NumberOfTips",
            DataField::Date => "Date",
            DataField::Order => "Order",
            DataField::AvgDiameter => "TotAvgDiam(mm/10)",
        }
    }

    /// Average diameter is the only optional data field
    pub fn is_required(self) -> bool {
        !matches!(self, DataField::AvgDiameter)
    }

    pub fn slot(self) -> usize {
        IdentityField::ALL.len() + self as usize
    }
}

/// Number of built-in captured slots; custom fields start here
pub const BUILTIN_SLOTS: usize = IdentityField::ALL.len() + DataField::ALL.len();

/// Fields carried by the secondary synthesis table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthesisField {
    AliveTipsAtBirth,
    AliveTipsAtDeath,
}

impl SynthesisField {
    pub const ALL: [SynthesisField; 2] = [
        SynthesisField::AliveTipsAtBirth,
        SynthesisField::AliveTipsAtDeath,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SynthesisField::AliveTipsAtBirth => "AliveTipsAtBirth",
            SynthesisField::AliveTipsAtDeath => "AliveTipsAtDeath",
        }
    }
}

/// Attributes computed by reconciliation, never copied from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedField {
    Anomaly,
    IsAlive,
    Censored,
    HighestOrder,
    GoneSession,
    TipsAliveAtBirth,
    TipsAliveAtGone,
    BirthDate,
    BirthYear,
    GoneDate,
    GoneYear,
}

impl DerivedField {
    pub const ALL: [DerivedField; 11] = [
        DerivedField::Anomaly,
        DerivedField::IsAlive,
        DerivedField::Censored,
        DerivedField::HighestOrder,
        DerivedField::GoneSession,
        DerivedField::TipsAliveAtBirth,
        DerivedField::TipsAliveAtGone,
        DerivedField::BirthDate,
        DerivedField::BirthYear,
        DerivedField::GoneDate,
        DerivedField::GoneYear,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DerivedField::Anomaly => "anomaly",
            DerivedField::IsAlive => "isAlive",
            DerivedField::Censored => "censored",
            DerivedField::HighestOrder => "highestOrder",
            DerivedField::GoneSession => "goneSession",
            DerivedField::TipsAliveAtBirth => "tipsAliveAtBirth",
            DerivedField::TipsAliveAtGone => "tipsAliveAtGone",
            DerivedField::BirthDate => "birthDate",
            DerivedField::BirthYear => "birthYear",
            DerivedField::GoneDate => "goneDate",
            DerivedField::GoneYear => "goneYear",
        }
    }
}

/// Resolved handle for one logical field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    /// A value copied from observation records, by storage slot
    Captured(usize),
    Synthesis(SynthesisField),
    Derived(DerivedField),
}

impl From<IdentityField> for FieldKey {
    fn from(field: IdentityField) -> Self {
        FieldKey::Captured(field.slot())
    }
}

impl From<DataField> for FieldKey {
    fn from(field: DataField) -> Self {
        FieldKey::Captured(field.slot())
    }
}

impl From<SynthesisField> for FieldKey {
    fn from(field: SynthesisField) -> Self {
        FieldKey::Synthesis(field)
    }
}

impl From<DerivedField> for FieldKey {
    fn from(field: DerivedField) -> Self {
        FieldKey::Derived(field)
    }
}

/// Which declaration group a captured field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    Identity,
    Data,
    Custom,
}

/// One captured field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Label as it appears in the data source
    pub label: String,
    /// Sanitized attribute name
    pub attribute: String,
    pub group: FieldGroup,
    pub propagation: Propagation,
    /// Whether every record must carry this label
    pub required: bool,
}

/// Declared fields and their resolved keys
#[derive(Debug, Clone)]
pub struct FieldSchema {
    captured: Vec<FieldSpec>,
    by_label: HashMap<String, FieldKey>,
    by_attribute: HashMap<String, FieldKey>,
}

impl FieldSchema {
    /// Schema with only the built-in fields
    pub fn new() -> Result<Self> {
        Self::with_custom_fields(&BTreeMap::new())
    }

    /// Schema with custom fields from config (`label -> "BIRTH" | "FINAL"`)
    ///
    /// # Errors
    /// Returns `Error::Config` if a custom label collides with a built-in label,
    /// declares an unknown propagation policy, or sanitizes to an attribute
    /// name already in use.
    pub fn with_custom_fields(custom_fields: &BTreeMap<String, String>) -> Result<Self> {
        let mut schema = FieldSchema {
            captured: Vec::with_capacity(BUILTIN_SLOTS + custom_fields.len()),
            by_label: HashMap::new(),
            by_attribute: HashMap::new(),
        };

        for field in IdentityField::ALL {
            schema.push_captured(field.label(), FieldGroup::Identity, Propagation::AtBirth, true)?;
        }
        for field in DataField::ALL {
            schema.push_captured(
                field.label(),
                FieldGroup::Data,
                Propagation::AtBirth,
                field.is_required(),
            )?;
        }
        for field in SynthesisField::ALL {
            schema.register(field.label(), FieldKey::Synthesis(field))?;
        }
        for field in DerivedField::ALL {
            schema.register(field.label(), FieldKey::Derived(field))?;
        }

        for (label, policy) in custom_fields {
            info!("Preparing to extract custom field [{}]", label);
            if schema.by_label.contains_key(label) {
                return Err(Error::Config(format!(
                    "Custom field duplicates a required field [{}]",
                    label
                )));
            }
            let propagation: Propagation = policy.parse().map_err(|_| {
                Error::Config(format!(
                    "Unknown custom field propagation value [{}][{}]",
                    label, policy
                ))
            })?;
            schema.push_captured(label, FieldGroup::Custom, propagation, true)?;
        }

        debug!(
            captured = schema.captured.len(),
            custom = custom_fields.len(),
            "Field schema built"
        );
        Ok(schema)
    }

    fn push_captured(
        &mut self,
        label: &str,
        group: FieldGroup,
        propagation: Propagation,
        required: bool,
    ) -> Result<()> {
        let slot = self.captured.len();
        let attribute = self.register(label, FieldKey::Captured(slot))?;
        self.captured.push(FieldSpec {
            label: label.to_string(),
            attribute,
            group,
            propagation,
            required,
        });
        Ok(())
    }

    fn register(&mut self, label: &str, key: FieldKey) -> Result<String> {
        let attribute = sanitize_field_name(label)?;
        if self.by_label.contains_key(label) {
            return Err(Error::Config(format!("Field declared twice [{}]", label)));
        }
        if self.by_attribute.contains_key(&attribute) {
            return Err(Error::Config(format!(
                "Field [{}] scrubs to attribute [{}] which is already in use",
                label, attribute
            )));
        }
        self.by_label.insert(label.to_string(), key);
        self.by_attribute.insert(attribute.clone(), key);
        Ok(attribute)
    }

    /// Resolve a field by source label, falling back to attribute name
    pub fn resolve(&self, name: &str) -> Option<FieldKey> {
        self.by_label
            .get(name)
            .or_else(|| self.by_attribute.get(name))
            .copied()
    }

    /// All captured fields, indexed by storage slot
    pub fn captured(&self) -> &[FieldSpec] {
        &self.captured
    }

    /// Captured fields of one group, with their slots
    pub fn group(&self, group: FieldGroup) -> impl Iterator<Item = (usize, &FieldSpec)> {
        self.captured
            .iter()
            .enumerate()
            .filter(move |(_, spec)| spec.group == group)
    }

    /// Labels every observation record must carry
    pub fn required_labels(&self) -> impl Iterator<Item = &str> {
        self.captured
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.label.as_str())
    }

    /// Source label for a key
    pub fn label(&self, key: FieldKey) -> Option<&str> {
        match key {
            FieldKey::Captured(slot) => self.captured.get(slot).map(|spec| spec.label.as_str()),
            FieldKey::Synthesis(field) => Some(field.label()),
            FieldKey::Derived(field) => Some(field.label()),
        }
    }

    /// Sanitized attribute name for a key
    pub fn attribute(&self, key: FieldKey) -> Option<&str> {
        match key {
            FieldKey::Captured(slot) => self.captured.get(slot).map(|spec| spec.attribute.as_str()),
            other => self
                .by_attribute
                .iter()
                .find(|(_, k)| **k == other)
                .map(|(attribute, _)| attribute.as_str()),
        }
    }
}
