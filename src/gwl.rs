//! The gwl **command model**: the four pipetting primitives understood by the
//! Fluent worklist interpreter, their line serialization, a parser for reading
//! lines back, and a whole-file validity checker.
//!
//! A gwl file is line-oriented; every line is one command with `;`-joined
//! fields and a single-letter command ID up front:
//!
//! ```text
//! A;RackLabel;RackID;RackType;Position;TubeID;Volume;LiquidClass;TipType;TipMask
//! D;RackLabel;RackID;RackType;Position;TubeID;Volume;LiquidClass;TipType;TipMask
//! R;SrcRackLabel;SrcRackID;SrcRackType;SrcPosStart;SrcPosEnd;DestRackLabel;...
//! W;
//! C;<comment>
//! ```
//!
//! Unset fields serialize as the **empty string** with their delimiter kept in
//! place; a literal `None` in a worklist would stall the robot. Volumes are
//! rounded to 2 decimal places here, at the serialization boundary, and
//! nowhere earlier.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{FluentError, Result};

/// Liquid class for single asp/disp transfers of aqueous reagents.
pub const WATER_FREE_SINGLE: &str = "Water Free Single";
/// Liquid class for one-asp-multi-disp reagent distribution.
pub const WATER_FREE_MULTI: &str = "Water Free Multi";
/// Liquid class used for sample and water transfers with liquid detection.
pub const WATER_CONTACT_WET_SINGLE: &str = "Water Contact Wet Single";

/// Field bag shared by [`Command::Aspirate`] and [`Command::Dispense`].
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    pub rack_label: Option<String>,
    pub rack_id: Option<String>,
    pub rack_type: Option<String>,
    /// Linear well or tube position, 1-indexed.
    pub position: u32,
    pub tube_id: Option<String>,
    /// Volume in ul; rendered with 2 decimal places max.
    pub volume: Option<f64>,
    pub liquid_class: String,
    pub tip_type: Option<String>,
    pub tip_mask: Option<String>,
}

impl Default for Transfer {
    fn default() -> Self {
        Transfer {
            rack_label: None,
            rack_id: None,
            rack_type: None,
            position: 1,
            tube_id: None,
            volume: None,
            liquid_class: WATER_FREE_SINGLE.to_string(),
            tip_type: None,
            tip_mask: None,
        }
    }
}

/// One-source, many-destination aliquoting (`R;` line).
///
/// Aspirates once from `src_pos_start..=src_pos_end` and multi-dispenses into
/// the destination position range; `excluded_wells` lists positions inside
/// that range to skip.
#[derive(Clone, Debug, PartialEq)]
pub struct ReagentDistribution {
    pub src_rack_label: Option<String>,
    pub src_rack_id: Option<String>,
    pub src_rack_type: Option<String>,
    pub src_pos_start: u32,
    pub src_pos_end: u32,
    pub dest_rack_label: Option<String>,
    pub dest_rack_id: Option<String>,
    pub dest_rack_type: Option<String>,
    pub dest_pos_start: u32,
    pub dest_pos_end: u32,
    pub volume: f64,
    pub liquid_class: String,
    pub n_diti_reuses: u32,
    pub n_multi_disp: u32,
    pub direction: u32,
    pub excluded_wells: Vec<u32>,
}

impl Default for ReagentDistribution {
    fn default() -> Self {
        ReagentDistribution {
            src_rack_label: None,
            src_rack_id: None,
            src_rack_type: None,
            src_pos_start: 1,
            src_pos_end: 1,
            dest_rack_label: None,
            dest_rack_id: None,
            dest_rack_type: None,
            dest_pos_start: 1,
            dest_pos_end: 1,
            volume: 1.0,
            liquid_class: WATER_FREE_MULTI.to_string(),
            n_diti_reuses: 1,
            n_multi_disp: 5,
            direction: 0,
            excluded_wells: Vec::new(),
        }
    }
}

/// A single worklist command, one line of gwl output.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Aspirate(Transfer),
    Dispense(Transfer),
    ReagentDistribution(ReagentDistribution),
    /// Discard the current tip to waste.
    Wash,
    /// Section marker / free-text comment.
    Comment(String),
}

/// Render a volume with at most 2 decimal places and no trailing zeros
/// (`20.0 -> "20"`, `4.9 -> "4.9"`, `13.105 -> "13.11"`).
pub fn fmt_volume(v: f64) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn xstr(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

fn opt_field(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl Transfer {
    fn to_line(&self, id: char) -> String {
        format!(
            "{};{};{};{};{};{};{};{};{};{}",
            id,
            xstr(&self.rack_label),
            xstr(&self.rack_id),
            xstr(&self.rack_type),
            self.position,
            xstr(&self.tube_id),
            self.volume.map(fmt_volume).unwrap_or_default(),
            self.liquid_class,
            xstr(&self.tip_type),
            xstr(&self.tip_mask),
        )
    }
}

impl Command {
    /// Serialize to one gwl line (no trailing newline).
    pub fn to_gwl(&self) -> String {
        match self {
            Command::Aspirate(t) => t.to_line('A'),
            Command::Dispense(t) => t.to_line('D'),
            Command::ReagentDistribution(r) => {
                let excluded = r
                    .excluded_wells
                    .iter()
                    .map(|w| w.to_string())
                    .collect::<Vec<_>>()
                    .join(";");
                format!(
                    "R;{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{}",
                    xstr(&r.src_rack_label),
                    xstr(&r.src_rack_id),
                    xstr(&r.src_rack_type),
                    r.src_pos_start,
                    r.src_pos_end,
                    xstr(&r.dest_rack_label),
                    xstr(&r.dest_rack_id),
                    xstr(&r.dest_rack_type),
                    r.dest_pos_start,
                    r.dest_pos_end,
                    fmt_volume(r.volume),
                    r.liquid_class,
                    r.n_diti_reuses,
                    r.n_multi_disp,
                    r.direction,
                    excluded,
                )
            }
            Command::Wash => "W;".to_string(),
            Command::Comment(label) => format!("C;{label}"),
        }
    }

    /// Parse a serialized gwl line back into a [`Command`].
    ///
    /// Every field set at serialization time is recovered; empty fields come
    /// back as `None` (or the documented numeric default).
    pub fn parse(line: &str) -> Result<Command> {
        let line = line.trim_end_matches(['\r', '\n']);
        let bad = |reason: &str| FluentError::BadGwlLine {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = line.split(';').collect();
        match fields[0] {
            "W" => Ok(Command::Wash),
            "C" => Ok(Command::Comment(fields[1..].join(";"))),
            id @ ("A" | "D") => {
                if fields.len() != 10 {
                    return Err(bad("expected 10 fields"));
                }
                let t = Transfer {
                    rack_label: opt_field(fields[1]),
                    rack_id: opt_field(fields[2]),
                    rack_type: opt_field(fields[3]),
                    position: parse_u32_or(fields[4], 1).ok_or_else(|| bad("bad position"))?,
                    tube_id: opt_field(fields[5]),
                    volume: parse_opt_f64(fields[6]).ok_or_else(|| bad("bad volume"))?,
                    liquid_class: fields[7].to_string(),
                    tip_type: opt_field(fields[8]),
                    tip_mask: opt_field(fields[9]),
                };
                if id == "A" {
                    Ok(Command::Aspirate(t))
                } else {
                    Ok(Command::Dispense(t))
                }
            }
            "R" => {
                if fields.len() < 16 {
                    return Err(bad("expected at least 16 fields"));
                }
                let pos = |i: usize, default| {
                    parse_u32_or(fields[i], default).ok_or_else(|| bad("bad position field"))
                };
                let mut excluded = Vec::new();
                for f in fields.iter().skip(16).filter(|f| !f.is_empty()) {
                    excluded.push(f.parse::<u32>().map_err(|_| bad("bad excluded well"))?);
                }
                Ok(Command::ReagentDistribution(ReagentDistribution {
                    src_rack_label: opt_field(fields[1]),
                    src_rack_id: opt_field(fields[2]),
                    src_rack_type: opt_field(fields[3]),
                    src_pos_start: pos(4, 1)?,
                    src_pos_end: pos(5, 1)?,
                    dest_rack_label: opt_field(fields[6]),
                    dest_rack_id: opt_field(fields[7]),
                    dest_rack_type: opt_field(fields[8]),
                    dest_pos_start: pos(9, 1)?,
                    dest_pos_end: pos(10, 1)?,
                    volume: parse_opt_f64(fields[11])
                        .ok_or_else(|| bad("bad volume"))?
                        .unwrap_or(1.0),
                    liquid_class: fields[12].to_string(),
                    n_diti_reuses: pos(13, 1)?,
                    n_multi_disp: pos(14, 5)?,
                    direction: pos(15, 0)?,
                    excluded_wells: excluded,
                }))
            }
            other => Err(bad(&format!("unknown command ID \"{other}\""))),
        }
    }
}

fn parse_u32_or(s: &str, default: u32) -> Option<u32> {
    if s.is_empty() {
        Some(default)
    } else {
        s.parse().ok()
    }
}

fn parse_opt_f64(s: &str) -> Option<Option<f64>> {
    if s.is_empty() {
        Some(None)
    } else {
        s.parse().ok().map(Some)
    }
}

/// Validate that a gwl stream is structurally sound: no empty lines, and
/// every line starts with a known command ID (`A D R W F C B`).
pub fn check_gwl<R: BufRead>(reader: R) -> Result<()> {
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        let lineno = i + 1;
        match line.chars().next() {
            None => return Err(FluentError::EmptyGwlLine { line: lineno }),
            Some('A' | 'D' | 'R' | 'W' | 'F' | 'C' | 'B') => {}
            Some(c) => {
                return Err(FluentError::BadCommandId {
                    line: lineno,
                    leader: c,
                })
            }
        }
    }
    Ok(())
}

/// [`check_gwl`] over a file path.
pub fn check_gwl_file<P: AsRef<Path>>(path: P) -> Result<()> {
    check_gwl(BufReader::new(File::open(path.as_ref())?))
}
