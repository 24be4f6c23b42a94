//! Destination allocation: which plate and which well every sample (and each
//! of its replicates) lands in.
//!
//! Labware naming is explicit configuration ([`LabwareMap`]) handed to the
//! allocator per call; there is no process-wide labware table, so two
//! worklist generations with different worktable layouts never interfere.

use std::collections::HashMap;
use std::str::FromStr;

use polars::prelude::*;
use tracing::warn;

use crate::error::{FluentError, Result};
use crate::plate::PlateType;

/// Mapping from a labware *type* key (lowercased, e.g. `"96-well"`,
/// `"384-well"`, `"tube"`) to the concrete labware name on the worktable
/// (e.g. `"96 Well[008]"`).
///
/// Parsed from the CLI string form `"96-well:96 Well[008],384-well:384 Well[004]"`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabwareMap {
    names: HashMap<String, String>,
}

impl LabwareMap {
    /// Worktable name for a plate type; fails for unmapped types.
    pub fn name_for(&self, plate: PlateType) -> Result<&str> {
        self.name_for_key(plate.as_str())
    }

    /// Worktable name for an arbitrary type key (case-insensitive).
    pub fn name_for_key(&self, key: &str) -> Result<&str> {
        self.names
            .get(&key.trim().to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| FluentError::UnknownLabwareType(key.trim().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromStr for LabwareMap {
    type Err = FluentError;

    fn from_str(s: &str) -> Result<Self> {
        let mut names = HashMap::new();
        for entry in s.split(',').filter(|e| !e.trim().is_empty()) {
            let (key, name) = entry
                .split_once(':')
                .ok_or_else(|| FluentError::BadLabwareMap(entry.to_string()))?;
            if key.trim().is_empty() || name.trim().is_empty() {
                return Err(FluentError::BadLabwareMap(entry.to_string()));
            }
            names.insert(key.trim().to_ascii_lowercase(), name.trim().to_string());
        }
        Ok(LabwareMap { names })
    }
}

/// One destination: a sample replicate placed on a labware at a linear well.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub sample: String,
    /// Replicate number, 1-indexed.
    pub replicate: u32,
    /// Destination labware name on the worktable.
    pub labware: String,
    /// Linear well position, 1-indexed, column-major.
    pub well: u32,
}

/// The allocator result: the produced assignments plus how many were asked
/// for, so callers can detect capacity truncation instead of having it buried
/// in a stderr print.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub assignments: Vec<Assignment>,
    /// `samples x replicates` as requested, before any truncation.
    pub requested: usize,
}

impl Allocation {
    /// True when the plate ran out of wells and the tail was dropped.
    pub fn truncated(&self) -> bool {
        self.assignments.len() < self.requested
    }
}

/// Assign every sample replicate a destination well, sample-major and
/// contiguous from `start_well`.
///
/// Wells past the plate capacity are **truncated**, not an error: the
/// returned [`Allocation`] keeps the produced prefix and exposes the
/// shortfall through [`Allocation::truncated`]. Bad configuration
/// (`start_well` out of range, unmapped labware, zero replicates) fails
/// before any assignment is made.
pub fn assign_destinations(
    samples: &[String],
    replicate_count: u32,
    labware: &LabwareMap,
    plate: PlateType,
    start_well: u32,
) -> Result<Allocation> {
    if replicate_count < 1 {
        return Err(FluentError::ZeroReplicates);
    }
    let capacity = plate.well_capacity();
    if start_well < 1 || start_well > capacity {
        return Err(FluentError::InvalidStartWell {
            start_well,
            capacity,
        });
    }
    let labware_name = labware.name_for(plate)?.to_string();

    let requested = samples.len() * replicate_count as usize;
    let mut assignments = Vec::with_capacity(requested.min(capacity as usize));
    'outer: for sample in samples {
        for rep in 1..=replicate_count {
            let well = start_well + assignments.len() as u32;
            if well > capacity {
                warn!(
                    plate = plate.as_str(),
                    requested,
                    produced = assignments.len(),
                    "not enough wells for the number of samples; truncating"
                );
                break 'outer;
            }
            assignments.push(Assignment {
                sample: sample.clone(),
                replicate: rep,
                labware: labware_name.clone(),
                well,
            });
        }
    }

    Ok(Allocation {
        assignments,
        requested,
    })
}

/// Assignment table as a `DataFrame`, for on-screen previews.
pub fn assignments_frame(assignments: &[Assignment]) -> PolarsResult<DataFrame> {
    df!(
        "sample" => assignments.iter().map(|a| a.sample.clone()).collect::<Vec<_>>(),
        "replicate" => assignments.iter().map(|a| a.replicate).collect::<Vec<_>>(),
        "dest_labware" => assignments.iter().map(|a| a.labware.clone()).collect::<Vec<_>>(),
        "dest_well" => assignments.iter().map(|a| a.well).collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labware() -> LabwareMap {
        "96-well:96 Well[002],384-well:384 Well[002]"
            .parse()
            .unwrap()
    }

    fn samples(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn labware_map_parses_and_is_case_insensitive() {
        let map = labware();
        assert_eq!(map.name_for(PlateType::Well96).unwrap(), "96 Well[002]");
        assert_eq!(map.name_for_key("384-WELL").unwrap(), "384 Well[002]");
        assert!(map.name_for_key("tube").is_err());
        assert!("96-well=96 Well[002]".parse::<LabwareMap>().is_err());
    }

    #[test]
    fn replicates_expand_sample_major_from_start_well() {
        let alloc = assign_destinations(
            &samples(&["s1", "s2"]),
            3,
            &labware(),
            PlateType::Well96,
            1,
        )
        .unwrap();
        assert!(!alloc.truncated());
        assert_eq!(alloc.assignments.len(), 6);
        let got: Vec<(&str, u32, u32)> = alloc
            .assignments
            .iter()
            .map(|a| (a.sample.as_str(), a.replicate, a.well))
            .collect();
        assert_eq!(
            got,
            vec![
                ("s1", 1, 1),
                ("s1", 2, 2),
                ("s1", 3, 3),
                ("s2", 1, 4),
                ("s2", 2, 5),
                ("s2", 3, 6),
            ]
        );
        assert!(alloc.assignments.iter().all(|a| a.labware == "96 Well[002]"));
    }

    #[test]
    fn start_well_offsets_the_whole_block() {
        let alloc = assign_destinations(
            &samples(&["a"]),
            2,
            &labware(),
            PlateType::Well384,
            49,
        )
        .unwrap();
        assert_eq!(alloc.assignments[0].well, 49);
        assert_eq!(alloc.assignments[1].well, 50);
    }

    #[test]
    fn capacity_overflow_truncates_and_flags() {
        let alloc = assign_destinations(
            &samples(&["s1", "s2", "s3"]),
            1,
            &labware(),
            PlateType::Well96,
            95,
        )
        .unwrap();
        assert!(alloc.truncated());
        assert_eq!(alloc.requested, 3);
        let wells: Vec<u32> = alloc.assignments.iter().map(|a| a.well).collect();
        assert_eq!(wells, vec![95, 96]);
    }

    #[test]
    fn configuration_errors_are_fatal_up_front() {
        let err =
            assign_destinations(&samples(&["s"]), 1, &labware(), PlateType::Well96, 97)
                .unwrap_err();
        assert!(matches!(err, FluentError::InvalidStartWell { capacity: 96, .. }));

        let err =
            assign_destinations(&samples(&["s"]), 1, &labware(), PlateType::Well384, 0)
                .unwrap_err();
        assert!(matches!(err, FluentError::InvalidStartWell { .. }));

        let err =
            assign_destinations(&samples(&["s"]), 0, &labware(), PlateType::Well96, 1)
                .unwrap_err();
        assert!(matches!(err, FluentError::ZeroReplicates));

        let empty = LabwareMap::default();
        let err = assign_destinations(&samples(&["s"]), 1, &empty, PlateType::Well96, 1)
            .unwrap_err();
        assert!(matches!(err, FluentError::UnknownLabwareType(_)));
    }

    #[test]
    fn every_produced_assignment_joins_back_exactly_once() {
        let names = samples(&["s1", "s2", "s3"]);
        let alloc =
            assign_destinations(&names, 2, &labware(), PlateType::Well96, 1).unwrap();
        for name in &names {
            let reps: Vec<u32> = alloc
                .assignments
                .iter()
                .filter(|a| &a.sample == name)
                .map(|a| a.replicate)
                .collect();
            assert_eq!(reps, vec![1, 2]);
        }
        // wells unique and contiguous
        let wells: Vec<u32> = alloc.assignments.iter().map(|a| a.well).collect();
        assert_eq!(wells, (1..=6).collect::<Vec<u32>>());
    }
}
