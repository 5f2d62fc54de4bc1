//! Synthesis index
//!
//! The synthesis table carries precomputed tip-survivorship values, one record
//! per (tube, root). The index is matched against the reconciled tubes by
//! identity and its values copied onto each root.

use crate::fields::SynthesisField;
use crate::root::RootIdentity;
use crate::source::Record;
use crate::tube::{Tube, TubeNumber};
use rhizo_common::{Error, FieldValue, Result};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Synthesis values by (tube, root identity)
#[derive(Debug, Clone, Default)]
pub struct SynthesisIndex {
    entries: HashMap<(TubeNumber, RootIdentity), [FieldValue; 2]>,
}

impl SynthesisIndex {
    /// Index synthesis records
    ///
    /// # Errors
    /// `Error::Data` if two records share a tube and root identity, or a
    /// record's identity fields cannot be read.
    pub fn build(records: &[Record]) -> Result<Self> {
        let mut entries = HashMap::with_capacity(records.len());
        for record in records {
            let tube = TubeNumber::from_record(record)?;
            let identity = RootIdentity::from_record(record)?;
            let mut values: [FieldValue; 2] = Default::default();
            for field in SynthesisField::ALL {
                values[field as usize] = record.require(field.label())?.clone();
            }
            if entries.insert((tube.clone(), identity.clone()), values).is_some() {
                return Err(Error::Data(format!(
                    "Duplicate synthesis record for root {} in tube {}",
                    identity, tube
                )));
            }
        }
        debug!(entries = entries.len(), "Built synthesis index");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct tube numbers present in the index
    pub fn tube_numbers(&self) -> BTreeSet<&TubeNumber> {
        self.entries.keys().map(|(tube, _)| tube).collect()
    }

    /// Fail unless the index covers exactly the given tubes
    pub fn check_tubes<'a, I>(&self, primary: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TubeNumber>,
    {
        let primary: BTreeSet<&TubeNumber> = primary.into_iter().collect();
        let synthesis = self.tube_numbers();
        if primary != synthesis {
            let only_primary: Vec<&str> = primary.difference(&synthesis).map(|t| t.as_str()).collect();
            let only_synthesis: Vec<&str> = synthesis.difference(&primary).map(|t| t.as_str()).collect();
            return Err(Error::Data(format!(
                "Tube numbers differ between tables (only in observations: {:?}, only in synthesis: {:?})",
                only_primary, only_synthesis
            )));
        }
        Ok(())
    }

    pub fn get(&self, tube: &TubeNumber, identity: &RootIdentity) -> Option<&[FieldValue; 2]> {
        self.entries.get(&(tube.clone(), identity.clone()))
    }

    /// Copy synthesis values onto the tube's roots
    ///
    /// Returns how many roots had a matching record; roots without one keep
    /// empty synthesis values.
    pub fn apply(&self, tube: &mut Tube) -> Result<usize> {
        let number = tube.number().clone();
        let mut applied = 0;
        for root in tube.roots_mut() {
            let Some(values) = self.entries.get(&(number.clone(), root.identity().clone())) else {
                continue;
            };
            for field in SynthesisField::ALL {
                root.set(field.into(), values[field as usize].clone())?;
            }
            applied += 1;
        }
        debug!(tube = %number, applied, "Applied synthesis values");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth(tube: i64, name: &str, at_birth: i64) -> Record {
        Record::from_pairs(
            0,
            [
                ("RootName", FieldValue::from(name)),
                ("Location#", FieldValue::Int(1)),
                ("BirthSession", FieldValue::Int(1)),
                ("Tube#", FieldValue::Int(tube)),
                ("AliveTipsAtBirth", FieldValue::Int(at_birth)),
                ("AliveTipsAtDeath", FieldValue::Empty),
            ],
        )
    }

    #[test]
    fn test_build_and_get() {
        let index = SynthesisIndex::build(&[synth(8, "R1", 2), synth(9, "R1", 4)]).unwrap();
        assert_eq!(index.len(), 2);
        let values = index
            .get(&TubeNumber::new("9"), &RootIdentity::new("R1", "1", 1))
            .unwrap();
        assert_eq!(values[SynthesisField::AliveTipsAtBirth as usize], FieldValue::Int(4));
    }

    #[test]
    fn test_duplicate_identity_is_data_error() {
        let result = SynthesisIndex::build(&[synth(8, "R1", 2), synth(8, "R1", 3)]);
        match result {
            Err(Error::Data(msg)) => assert!(msg.contains("Duplicate")),
            other => panic!("Expected data error, got {:?}", other),
        }
    }

    #[test]
    fn test_check_tubes() {
        let index = SynthesisIndex::build(&[synth(8, "R1", 2), synth(9, "R1", 4)]).unwrap();
        let same = [TubeNumber::new("9"), TubeNumber::new("8")];
        assert!(index.check_tubes(&same).is_ok());

        let different = [TubeNumber::new("8"), TubeNumber::new("10")];
        match index.check_tubes(&different) {
            Err(Error::Data(msg)) => {
                assert!(msg.contains("10"));
                assert!(msg.contains("9"));
            }
            other => panic!("Expected data error, got {:?}", other),
        }
    }
}
