//! Record sources
//!
//! The reconciliation core consumes flat label → value records. A
//! [`RecordSource`] supplies them: one record per (root, session) observation
//! from the primary table, and optionally one record per (root, tube) from the
//! synthesis table.
//!
//! [`JsonSource`] reads both tables from one JSON document:
//!
//! ```json
//! {
//!   "observations": [ { "RootName": "R1", "Location#": 3, "Session#": 1, ... } ],
//!   "synthesis":    [ { "RootName": "R1", "AliveTipsAtBirth": 2, ... } ]
//! }
//! ```

use crate::fields::{FieldSchema, IdentityField, SynthesisField};
use crate::tube::TubeNumber;
use rhizo_common::{Error, FieldValue, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One extracted row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Zero-based position within its table, for error messages
    position: usize,
    fields: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new(position: usize, fields: HashMap<String, FieldValue>) -> Self {
        Self { position, fields }
    }

    /// Build a record from `(label, value)` pairs
    pub fn from_pairs<I, K, V>(position: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self {
            position,
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn get(&self, label: &str) -> Option<&FieldValue> {
        self.fields.get(label)
    }

    /// Value for a label that must be present
    pub fn require(&self, label: &str) -> Result<&FieldValue> {
        self.fields.get(label).ok_or_else(|| {
            Error::Data(format!(
                "Failed to obtain header value: {} (record {})",
                label, self.position
            ))
        })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.fields.contains_key(label)
    }
}

/// Supplier of extracted tables
pub trait RecordSource {
    /// Observation records from the primary table
    ///
    /// # Errors
    /// Fails rather than returning a partial set when a required label is
    /// missing or the data block is empty.
    fn observations(&self, schema: &FieldSchema) -> Result<Vec<Record>>;

    /// Records from the synthesis table, if the source has one
    fn synthesis(&self, schema: &FieldSchema) -> Result<Option<Vec<Record>>>;
}

#[derive(Debug, Deserialize)]
struct SourceDocument {
    observations: Vec<HashMap<String, FieldValue>>,
    #[serde(default)]
    synthesis: Option<Vec<HashMap<String, FieldValue>>>,
}

/// Tables read from a JSON document
#[derive(Debug)]
pub struct JsonSource {
    document: SourceDocument,
}

impl JsonSource {
    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let source = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            observations = source.document.observations.len(),
            "Loaded source document"
        );
        Ok(source)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: SourceDocument = serde_json::from_str(content)?;
        Ok(Self { document })
    }
}

impl RecordSource for JsonSource {
    fn observations(&self, schema: &FieldSchema) -> Result<Vec<Record>> {
        let records = data_block(&self.document.observations, "observations")?;
        let labels: Vec<&str> = schema.required_labels().collect();
        validate_header(&records, &labels)?;
        Ok(records)
    }

    fn synthesis(&self, _schema: &FieldSchema) -> Result<Option<Vec<Record>>> {
        let Some(rows) = &self.document.synthesis else {
            return Ok(None);
        };
        let records = data_block(rows, "synthesis")?;
        let labels: Vec<&str> = IdentityField::ALL
            .iter()
            .map(|f| f.label())
            .chain(SynthesisField::ALL.iter().map(|f| f.label()))
            .collect();
        validate_header(&records, &labels)?;
        Ok(Some(records))
    }
}

/// Cut a table down to its data block
///
/// The block ends at the first row whose root name is absent or blank; rows
/// after it are ignored.
pub fn data_block(rows: &[HashMap<String, FieldValue>], table: &str) -> Result<Vec<Record>> {
    let name_label = IdentityField::RootName.label();
    let end = rows
        .iter()
        .position(|row| row.get(name_label).map_or(true, FieldValue::is_empty))
        .unwrap_or(rows.len());

    if end == 0 {
        return Err(Error::Data(format!(
            "Failed to find end of the {} data block",
            table
        )));
    }
    if end < rows.len() {
        debug!(table, end, ignored = rows.len() - end, "Data block ends before table end");
    }

    Ok(rows[..end]
        .iter()
        .enumerate()
        .map(|(position, row)| Record::new(position, row.clone()))
        .collect())
}

/// Fail if any record lacks one of `labels`
pub fn validate_header(records: &[Record], labels: &[&str]) -> Result<()> {
    for record in records {
        for label in labels {
            record.require(label)?;
        }
    }
    Ok(())
}

/// Observations for one tube, in source order
#[derive(Debug, Clone)]
pub struct TubeRecords {
    pub number: TubeNumber,
    pub records: Vec<Record>,
}

/// Split records by tube number, tubes in order of first appearance
pub fn group_by_tube(records: Vec<Record>) -> Result<Vec<TubeRecords>> {
    let mut groups: Vec<TubeRecords> = Vec::new();
    let mut index: HashMap<TubeNumber, usize> = HashMap::new();

    for record in records {
        let number = TubeNumber::from_record(&record)?;
        match index.get(&number) {
            Some(&i) => groups[i].records.push(record),
            None => {
                index.insert(number.clone(), groups.len());
                groups.push(TubeRecords {
                    number,
                    records: vec![record],
                });
            }
        }
    }

    debug!(tubes = groups.len(), "Grouped observations by tube");
    Ok(groups)
}
