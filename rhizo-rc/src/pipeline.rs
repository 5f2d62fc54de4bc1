//! Reconciliation orchestrator
//!
//! Per tube: build roots from the tube's records, feed them to a [`Tube`] in
//! session order, finalize the terminal-session roots, then compute tip
//! statistics and annotate dates. Synthesis values, when the source has a
//! synthesis table, are matched on afterwards.

use crate::fields::{DataField, FieldSchema, SynthesisField};
use crate::root::{Root, RootObservation};
use crate::source::{group_by_tube, Record, RecordSource};
use crate::synthesis::SynthesisIndex;
use crate::tip_stats::TipStats;
use crate::tube::{Tube, TubeNumber};
use rhizo_common::{FieldValue, Result};
use tracing::{debug, error, info, warn};

/// What happened while reconciling one tube
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TubeOutcome {
    pub number: TubeNumber,
    /// Records ingested
    pub observations: usize,
    /// Distinct roots after reconciliation
    pub roots: usize,
    /// Terminal observations whose root could not be found
    pub finalize_failures: usize,
    /// Roots whose last observation precedes the terminal session
    pub unfinalized: usize,
}

/// Result of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Tubes ready for reporting, in source order
    pub tubes: Vec<Tube>,
    pub outcomes: Vec<TubeOutcome>,
    /// Tubes dropped because their tip statistics were inconsistent
    pub skipped: Vec<TubeNumber>,
}

impl RunSummary {
    pub fn finalize_failures(&self) -> usize {
        self.outcomes.iter().map(|o| o.finalize_failures).sum()
    }

    pub fn unfinalized(&self) -> usize {
        self.outcomes.iter().map(|o| o.unfinalized).sum()
    }

    pub fn root_count(&self) -> usize {
        self.tubes.iter().map(Tube::len).sum()
    }
}

/// Drives reconciliation for every tube of a source
#[derive(Debug, Clone)]
pub struct Reconciler {
    schema: FieldSchema,
}

impl Reconciler {
    pub fn new(schema: FieldSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Reconcile and finalize one tube's observations
    ///
    /// # Errors
    /// Any record that cannot be turned into a root aborts the tube. Failed
    /// finalizations are logged and counted in the outcome instead.
    pub fn reconcile_tube(&self, number: TubeNumber, records: &[Record]) -> Result<(Tube, TubeOutcome)> {
        let mut tube = Tube::new(number.clone());
        let mut observations: Vec<RootObservation> = Vec::with_capacity(records.len());

        for record in records {
            let observation = Root::from_record(record, &self.schema)?;
            let date = record.get(DataField::Date.label()).cloned().unwrap_or_default();
            tube.record_session(observation.root.session(), &date);
            observations.push(observation);
        }

        // Stable: rows within a session keep source order
        observations.sort_by_key(|obs| obs.root.session());

        let max_session = tube.max_session();
        let mut terminal = Vec::new();
        for observation in observations {
            if observation.root.session() == max_session {
                tube.insert_or_update(observation.root.clone());
                terminal.push(observation);
            } else {
                tube.insert_or_update(observation.root);
            }
        }

        debug!(tube = %number, terminal = terminal.len(), "Finalizing roots");
        let mut finalize_failures = 0;
        for observation in &terminal {
            if let Err(e) = tube.finalize(observation) {
                error!(tube = %number, root = %observation.root.identity(), "Failed to finalize root: {}", e);
                finalize_failures += 1;
            }
        }

        let unfinalized = tube.unfinalized().count();
        if unfinalized > 0 {
            warn!(
                tube = %number,
                unfinalized,
                max_session,
                "Roots not observed at the terminal session were left unfinalized"
            );
        }

        debug!(tube = %number, roots = tube.len(), "Reconciled tube");
        let outcome = TubeOutcome {
            number,
            observations: records.len(),
            roots: tube.len(),
            finalize_failures,
            unfinalized,
        };
        Ok((tube, outcome))
    }

    /// Compute tip statistics and session dates for a reconciled tube
    pub fn annotate_tube(&self, tube: &mut Tube) -> Result<()> {
        let stats = TipStats::compute(tube.roots());
        tube.apply_tip_stats(stats)?;
        tube.annotate_dates();
        Ok(())
    }

    /// Process every tube of `source`
    ///
    /// # Errors
    /// Data errors in any record, a duplicate synthesis record, or a tube set
    /// mismatch between the two tables abort the run. A tube whose tip
    /// statistics are inconsistent is skipped and listed in the summary.
    pub fn run(&self, source: &dyn RecordSource) -> Result<RunSummary> {
        let records = source.observations(&self.schema)?;
        let groups = group_by_tube(records)?;
        info!(tubes = groups.len(), "Found tubes in source");

        let synthesis = match source.synthesis(&self.schema)? {
            Some(records) => {
                let index = SynthesisIndex::build(&records)?;
                index.check_tubes(groups.iter().map(|g| &g.number))?;
                Some(index)
            }
            None => None,
        };

        let mut summary = RunSummary::default();
        for group in groups {
            let (mut tube, outcome) = self.reconcile_tube(group.number, &group.records)?;

            if let Err(e) = self.annotate_tube(&mut tube) {
                error!(tube = %outcome.number, "Skipping tube with inconsistent tip statistics: {}", e);
                summary.skipped.push(outcome.number.clone());
                summary.outcomes.push(outcome);
                continue;
            }

            if let Some(index) = &synthesis {
                index.apply(&mut tube)?;
                warn_synthesis_mismatches(&tube);
            }

            info!(
                tube = %outcome.number,
                observations = outcome.observations,
                roots = outcome.roots,
                "Processed tube"
            );
            summary.tubes.push(tube);
            summary.outcomes.push(outcome);
        }

        Ok(summary)
    }
}

fn warn_synthesis_mismatches(tube: &Tube) {
    for root in tube.roots() {
        let recorded = root.get(SynthesisField::AliveTipsAtBirth.into());
        if recorded.is_empty() {
            continue;
        }
        let computed = root.tips_alive_at_birth();
        if recorded.as_i64() != computed {
            warn!(
                tube = %tube.number(),
                root = %root.identity(),
                recorded = %recorded,
                computed = %FieldValue::from(computed),
                "Synthesis alive tips at birth disagrees with computed value"
            );
        }
    }
}
