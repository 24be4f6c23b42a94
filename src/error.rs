//! Error taxonomy shared across the crate.
//!
//! Three tiers, mirrored in how callers treat them:
//! - **configuration errors** (bad plate type, bad labware map, out-of-range
//!   start well or tube index) are raised before any computation begins;
//! - **batch-infeasibility errors** (a volume that cannot physically fit)
//!   abort the whole worklist generation;
//! - row-level data-quality problems are *not* errors: they are logged as
//!   `tracing` warnings at the call sites and processing continues.

use thiserror::Error;

/// All structured failures produced by the library.
#[derive(Debug, Error)]
pub enum FluentError {
    /// A plate/labware type string had no mapping.
    #[error("labware type \"{0}\" not recognized")]
    UnknownLabwareType(String),

    /// A (row, column) plate coordinate fell outside the plate.
    #[error("well location ({row}{column}) is out of range for a {plate} plate")]
    OutOfRangeWell {
        row: char,
        column: u32,
        plate: &'static str,
    },

    /// Destination start well outside `[1, capacity]`.
    #[error("destination start well # must be in range: 1-{capacity} (got {start_well})")]
    InvalidStartWell { start_well: u32, capacity: u32 },

    /// The allocator needs at least one replicate per sample.
    #[error("replicate count must be >= 1")]
    ZeroReplicates,

    /// A reagent tube number outside the 24-position runner.
    #[error("{reagent} tube # must be in range: 1-24 (got {tube})")]
    TubeOutOfRange { reagent: &'static str, tube: u32 },

    /// Recipe error: more mastermix than total reaction volume.
    #[error("MasterMix volume ({mastermix} ul) > total reaction volume ({total} ul)")]
    MastermixExceedsTotal { mastermix: f64, total: f64 },

    /// A computed post-dilution total cannot fit in any destination well.
    /// Fatal for the whole batch: the chosen dilution parameters are
    /// physically infeasible.
    #[error("row {row}: total dilution volume {total} ul exceeds the max well volume ({max_well_vol} ul)")]
    ExceedsWellCapacity {
        row: usize,
        total: f64,
        max_well_vol: f64,
    },

    /// The dilution math produced a sample aliquot that cannot be pipetted
    /// (negative diluent, or an aliquot above the allowed maximum).
    #[error("row {row}: infeasible dilution (sample aliquot {sample} ul of total {total} ul)")]
    InfeasibleDilution { row: usize, sample: f64, total: f64 },

    /// The reaction recipe leaves a negative water volume for a row.
    #[error("row {row}: negative water volume ({water} ul); check the reaction recipe")]
    NegativeWaterVolume { row: usize, water: f64 },

    /// A required column was absent from the input table.
    #[error("required column \"{0}\" not found (capitalization-invariant)")]
    MissingColumn(String),

    /// The input parsed to a single column, almost always a delimiter mixup.
    #[error("input table is only 1 column; wrong delimiter used?")]
    SingleColumn,

    /// A `--rows` style range spec could not be parsed.
    #[error("cannot parse row range \"{0}\"")]
    BadRowRange(String),

    /// A row subset referenced a row past the end of the table.
    #[error("row {row} requested but the table has only {nrows} rows")]
    RowOutOfRange { row: usize, nrows: usize },

    /// A labware map string was not of the form `type:name,type:name`.
    #[error("cannot parse labware map entry \"{0}\" (expected type:name)")]
    BadLabwareMap(String),

    /// A gwl line began with an unknown command ID.
    #[error("line {line}: \"{leader}\" not a valid command ID")]
    BadCommandId { line: usize, leader: char },

    /// Empty lines are not allowed in gwl files.
    #[error("line {line}: empty lines not allowed in gwl files")]
    EmptyGwlLine { line: usize },

    /// A gwl line could not be parsed back into a command.
    #[error("cannot parse gwl line \"{line}\": {reason}")]
    BadGwlLine { line: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FluentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let e = FluentError::UnknownLabwareType("1536-well".to_string());
        assert!(e.to_string().contains("1536-well"));
        let e = FluentError::InvalidStartWell { start_well: 97, capacity: 96 };
        assert!(e.to_string().contains("1-96"));
        let e = FluentError::TubeOutOfRange { reagent: "MasterMix", tube: 25 };
        assert!(e.to_string().contains("MasterMix"));
    }
}
