//! Plate geometry: plate formats, coordinate conversion and traversal order.
//!
//! The Fluent controller addresses wells by a single **column-major, 1-indexed
//! linear position**: well 1 is A1, well 2 is B1, and the numbering continues
//! down each column before moving right. [`to_linear_well`] performs the
//! conversion from the (row letter, column number) coordinates found in plate
//! layout exports.
//!
//! [`reorder_for_throughput`] is the 384-well traversal optimization: pipetting
//! all odd linear positions before all even ones processes alternating rows
//! together, which reduces head travel on high-density plates. It is offered as
//! an ordering strategy the caller applies explicitly, not a hard default.

use core::fmt;
use std::str::FromStr;

use crate::error::{FluentError, Result};

/// Supported destination/source plate formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PlateType {
    /// Standard 96-well plate (8 rows x 12 columns).
    Well96,
    /// High-density 384-well plate (16 rows x 24 columns).
    Well384,
}

impl PlateType {
    /// Total number of wells on the plate.
    pub fn well_capacity(self) -> u32 {
        match self {
            PlateType::Well96 => 96,
            PlateType::Well384 => 384,
        }
    }

    /// Number of physical rows (the column-major stride).
    pub fn row_count(self) -> u32 {
        match self {
            PlateType::Well96 => 8,
            PlateType::Well384 => 16,
        }
    }

    /// Canonical string form, matching the CLI choices.
    pub fn as_str(self) -> &'static str {
        match self {
            PlateType::Well96 => "96-well",
            PlateType::Well384 => "384-well",
        }
    }
}

impl fmt::Display for PlateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlateType {
    type Err = FluentError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "96-well" | "96" => Ok(PlateType::Well96),
            "384-well" | "384" => Ok(PlateType::Well384),
            other => Err(FluentError::UnknownLabwareType(other.to_string())),
        }
    }
}

/// Convert (row letter, 1-indexed column) to the linear well position.
///
/// `index = (column - 1) * row_count + row_index`, with `row_index('A') = 1`.
/// A row letter past the plate's last row (e.g. `J` on a 96-well plate) is a
/// caller error and fails; it must not wrap into the next column.
pub fn to_linear_well(row: char, column: u32, plate: PlateType) -> Result<u32> {
    let r = row.to_ascii_uppercase();
    let err = FluentError::OutOfRangeWell {
        row,
        column,
        plate: plate.as_str(),
    };
    if !r.is_ascii_uppercase() {
        return Err(err);
    }
    let row_index = (r as u32) - ('A' as u32) + 1;
    let column_count = plate.well_capacity() / plate.row_count();
    if row_index > plate.row_count() || column < 1 || column > column_count {
        return Err(err);
    }
    Ok((column - 1) * plate.row_count() + row_index)
}

/// Reorder items so that odd linear wells are pipetted before even ones.
///
/// Within each parity class the ordering is by ascending well (the sort is
/// stable), so applying this twice is a no-op. For 96-well plates the whole
/// operation is the identity: the optimization only pays off at 384-well
/// density.
pub fn reorder_for_throughput<T, F>(items: &mut [T], plate: PlateType, well_of: F)
where
    F: Fn(&T) -> u32,
{
    if plate != PlateType::Well384 {
        return;
    }
    items.sort_by_key(|x| {
        let w = well_of(x);
        (w % 2 == 0, w)
    });
}
