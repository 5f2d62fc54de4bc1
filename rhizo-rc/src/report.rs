//! Report writers
//!
//! One row per root, grouped by tube, one column per [`ReportHeader`] entry.
//! Values are looked up through [`Root::get`](crate::root::Root::get); unset
//! values are written as missing (`null` in JSON, the configured marker in
//! TSV).
//!
//! Writers never leave a partial report behind: output goes to a `.tmp`
//! sibling which is renamed over the target once complete.

use crate::fields::{DerivedField, FieldGroup, FieldKey, FieldSchema, SynthesisField};
use crate::tube::Tube;
use rhizo_common::config::{ReportConfig, ReportFormat};
use rhizo_common::{Error, FieldValue, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One report column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportColumn {
    pub label: String,
    pub key: FieldKey,
}

/// Stable column ordering
///
/// Identity fields, then data and custom fields, then synthesis fields, then
/// derived attributes. Each group is sorted by label and a label already
/// placed by an earlier group is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    columns: Vec<ReportColumn>,
}

impl ReportHeader {
    pub fn from_schema(schema: &FieldSchema) -> Self {
        let identity: Vec<(String, FieldKey)> = schema
            .group(FieldGroup::Identity)
            .map(|(slot, spec)| (spec.label.clone(), FieldKey::Captured(slot)))
            .collect();
        let data: Vec<(String, FieldKey)> = schema
            .group(FieldGroup::Data)
            .chain(schema.group(FieldGroup::Custom))
            .map(|(slot, spec)| (spec.label.clone(), FieldKey::Captured(slot)))
            .collect();
        let synthesis: Vec<(String, FieldKey)> = SynthesisField::ALL
            .iter()
            .map(|&f| (f.label().to_string(), f.into()))
            .collect();
        let derived: Vec<(String, FieldKey)> = DerivedField::ALL
            .iter()
            .map(|&f| (f.label().to_string(), f.into()))
            .collect();

        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for mut group in [identity, data, synthesis, derived] {
            group.sort_by(|a, b| a.0.cmp(&b.0));
            for (label, key) in group {
                if seen.insert(label.clone()) {
                    columns.push(ReportColumn { label, key });
                }
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[ReportColumn] {
        &self.columns
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Writes finished tubes to a report
pub trait ReportWriter {
    /// # Errors
    /// `Error::Serialization` when `tubes` is empty; I/O failures are
    /// returned as `Error::Io`.
    fn write(&self, tubes: &[Tube], header: &ReportHeader) -> Result<()>;
}

/// Writer for the configured (or overridden) format
pub fn writer_for(format: ReportFormat, path: &Path, config: &ReportConfig) -> Box<dyn ReportWriter> {
    match format {
        ReportFormat::Json => Box::new(JsonReportWriter::new(path, config.pretty)),
        ReportFormat::Tsv => Box::new(TsvReportWriter::new(path, &config.missing_marker)),
    }
}

fn ensure_tubes(tubes: &[Tube]) -> Result<()> {
    if tubes.is_empty() {
        return Err(Error::Serialization("No tubes to write".to_string()));
    }
    Ok(())
}

/// Write `content` to `path` via a temporary sibling file
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    {
        let mut file = fs::File::create(&temp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = content.len(), "Report written");
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    header: Vec<&'a str>,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// `{ "header": [...], "rows": [ {label: value|null} ] }`
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    path: PathBuf,
    pretty: bool,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            path: path.into(),
            pretty,
        }
    }
}

impl ReportWriter for JsonReportWriter {
    fn write(&self, tubes: &[Tube], header: &ReportHeader) -> Result<()> {
        ensure_tubes(tubes)?;

        let mut rows = Vec::new();
        for tube in tubes {
            debug!(tube = %tube.number(), roots = tube.len(), "Writing tube");
            for root in tube.roots() {
                let mut row = serde_json::Map::new();
                for column in header.columns() {
                    row.insert(column.label.clone(), serde_json::to_value(root.get(column.key))?);
                }
                rows.push(row);
            }
        }

        let report = JsonReport {
            header: header.labels().collect(),
            rows,
        };
        let content = if self.pretty {
            serde_json::to_vec_pretty(&report)?
        } else {
            serde_json::to_vec(&report)?
        };
        write_atomic(&self.path, &content)?;
        info!(path = %self.path.display(), rows = report.rows.len(), "Wrote JSON report");
        Ok(())
    }
}

/// Tab-separated report with a header line
#[derive(Debug, Clone)]
pub struct TsvReportWriter {
    path: PathBuf,
    missing_marker: String,
}

impl TsvReportWriter {
    pub fn new(path: impl Into<PathBuf>, missing_marker: &str) -> Self {
        Self {
            path: path.into(),
            missing_marker: missing_marker.to_string(),
        }
    }

    fn cell(&self, value: &FieldValue) -> String {
        if value.is_empty() {
            self.missing_marker.clone()
        } else {
            value.to_string().replace(['\t', '\n', '\r'], " ")
        }
    }
}

impl ReportWriter for TsvReportWriter {
    fn write(&self, tubes: &[Tube], header: &ReportHeader) -> Result<()> {
        ensure_tubes(tubes)?;

        let mut out = header.labels().collect::<Vec<_>>().join("\t");
        out.push('\n');
        let mut rows = 0;
        for tube in tubes {
            debug!(tube = %tube.number(), roots = tube.len(), "Writing tube");
            for root in tube.roots() {
                let cells: Vec<String> = header
                    .columns()
                    .iter()
                    .map(|column| self.cell(&root.get(column.key)))
                    .collect();
                out.push_str(&cells.join("\t"));
                out.push('\n');
                rows += 1;
            }
        }

        write_atomic(&self.path, out.as_bytes())?;
        info!(path = %self.path.display(), rows, "Wrote TSV report");
        Ok(())
    }
}
