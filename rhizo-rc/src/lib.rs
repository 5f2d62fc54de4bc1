//! rhizo-rc library - root-tube reconciliation
//!
//! Turns per-session root observations into one record per physical root:
//! observations are merged by identity within each tube, finalized at the
//! tube's terminal session and annotated with tip-survivorship counts before
//! being handed to a report writer.

pub mod fields;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod root;
pub mod source;
pub mod synthesis;
pub mod tip_stats;
pub mod tube;

pub use fields::FieldSchema;
pub use pipeline::{Reconciler, RunSummary, TubeOutcome};
pub use report::{writer_for, ReportHeader, ReportWriter};
pub use root::{Root, RootIdentity, TipIdentity};
pub use source::{JsonSource, Record, RecordSource};
pub use tip_stats::TipStats;
pub use tube::{Tube, TubeNumber};
