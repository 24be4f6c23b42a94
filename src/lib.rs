#![forbid(unsafe_code)]
//! # fluentgen
//!
//! Worklist (**gwl**) generator for the TECAN Fluent liquid-handling robot:
//! turn tabular lab inputs (qPCR plate layouts, NGS amplicon mapping files,
//! concentration tables) into the line-oriented command protocol the robot
//! controller consumes, plus a human-readable reagent report.
//!
//! ## Highlights
//! - 🧪 **Three workflows**: qPCR setup, NGS amplicon PCR prep, sample dilution.
//! - 📐 **Explicit command model**: aspirate/dispense/reagent-distribution/wash
//!   as typed variants with dedicated serializers ([`gwl`]).
//! - 🧭 **Deterministic core**: destination assignment and volume math are pure
//!   functions; output files are written atomically or not at all.
//!
//! ## Pipeline
//! Input table → destination assignment ([`dest`]) → volume plans ([`volume`])
//! → command emission ([`worklist`]) → `.gwl` + report files. Plate coordinate
//! handling and the 384-well traversal optimization live in [`plate`].
//!
//! ## Example
//! ```rust
//! use fluentgen::dest::{assign_destinations, LabwareMap};
//! use fluentgen::plate::PlateType;
//!
//! let labware: LabwareMap = "96-well:96 Well[002]".parse().unwrap();
//! let samples = vec!["s1".to_string(), "s2".to_string()];
//! let alloc = assign_destinations(&samples, 3, &labware, PlateType::Well96, 1).unwrap();
//! assert_eq!(alloc.assignments.len(), 6);
//! assert!(!alloc.truncated());
//! ```

pub mod amplicon;
pub mod dest;
pub mod dilute;
pub mod error;
pub mod gwl;
pub mod plate;
pub mod qpcr;
pub mod table;
pub mod util;
pub mod volume;
pub mod worklist;

pub use error::{FluentError, Result};

/// Crate version string (from `CARGO_PKG_VERSION`).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
