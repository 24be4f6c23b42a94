//! Worklist assembly and output.
//!
//! [`Worklist`] buffers commands in memory; nothing touches the filesystem
//! until [`Worklist::write_gwl`], which stages the serialized lines in a
//! temp file and persists atomically. Any fatal error during assembly
//! therefore leaves no usable partial worklist behind (all-or-nothing).
//!
//! Command emission never reorders rows: the incoming assignment sequence
//! (possibly already 384-well traversal-optimized) is the pipetting order.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;
use crate::gwl::{Command, ReagentDistribution, Transfer};

/// An in-memory worklist: an ordered command buffer.
#[derive(Clone, Debug, Default)]
pub struct Worklist {
    commands: Vec<Command>,
}

impl Worklist {
    pub fn new() -> Self {
        Worklist::default()
    }

    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    /// Section marker (`C;` line) ahead of a reagent class.
    pub fn comment(&mut self, label: &str) {
        self.commands.push(Command::Comment(label.to_string()));
    }

    /// One per-row transfer: aspirate, dispense, then tip to waste.
    /// Single-use tip policy; no tip ever carries over between rows.
    pub fn transfer(&mut self, aspirate: Transfer, dispense: Transfer) {
        self.commands.push(Command::Aspirate(aspirate));
        self.commands.push(Command::Dispense(dispense));
        self.commands.push(Command::Wash);
    }

    pub fn distribute(&mut self, rd: ReagentDistribution) {
        self.commands.push(Command::ReagentDistribution(rd));
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The serialized gwl text, one command per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            out.push_str(&cmd.to_gwl());
            out.push('\n');
        }
        out
    }

    /// Serialize and persist atomically.
    pub fn write_gwl(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.render())
    }
}

/// Stage `contents` in a temp file beside `path` and persist by rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(d) => NamedTempFile::new_in(d)?,
        None => NamedTempFile::new_in(".")?,
    };
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// How many dispenses one aspirate can feed, from the tip capacity:
/// 1000 ul tips when a single dispense exceeds 180 ul, 200 ul tips
/// otherwise; `floor(tip_capacity / per_dispense_volume)`, at least 1.
pub fn max_multi_dispense(per_dispense_volume: f64) -> u32 {
    if per_dispense_volume <= 0.0 {
        return 1;
    }
    let tip_capacity = if per_dispense_volume > 180.0 {
        1000.0
    } else {
        200.0
    };
    ((tip_capacity / per_dispense_volume).floor() as u32).max(1)
}

/// Build a one-source multi-dispense command covering exactly `wells` on a
/// single destination labware. Wells inside the covered `min..=max` span
/// that are not targeted go to the exclusion list. `None` when `wells` is
/// empty.
pub fn distribution_for_wells(
    src_label: &str,
    src_position: u32,
    dest_label: &str,
    wells: &[u32],
    volume: f64,
) -> Option<ReagentDistribution> {
    let lo = *wells.iter().min()?;
    let hi = *wells.iter().max()?;
    let targeted: HashSet<u32> = wells.iter().copied().collect();
    let excluded: Vec<u32> = (lo..=hi).filter(|w| !targeted.contains(w)).collect();
    Some(ReagentDistribution {
        src_rack_label: Some(src_label.to_string()),
        src_pos_start: src_position,
        src_pos_end: src_position,
        dest_rack_label: Some(dest_label.to_string()),
        dest_pos_start: lo,
        dest_pos_end: hi,
        volume,
        n_multi_disp: max_multi_dispense(volume),
        excluded_wells: excluded,
        ..ReagentDistribution::default()
    })
}

/// Rendered with `digits` decimal places, trailing zeros trimmed.
fn fmt_round(v: f64, digits: usize) -> String {
    let s = format!("{v:.digits$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Plain-text run report: reaction counts and total reagent volumes, once
/// raw and once with a pipetting-error surcharge.
#[derive(Clone, Debug, Default)]
pub struct Report {
    buf: String,
}

impl Report {
    pub fn new(title: &str) -> Self {
        let mut r = Report::default();
        r.section(title);
        r
    }

    /// `# <heading>` line.
    pub fn section(&mut self, heading: &str) {
        self.buf.push_str("# ");
        self.buf.push_str(heading);
        self.buf.push('\n');
    }

    /// `subject:<TAB>text` line.
    pub fn field(&mut self, subject: &str, text: &str) {
        self.buf.push_str(subject);
        self.buf.push_str(":\t");
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    /// Volume line, 1 decimal place, `NA` when absent. `error_perc`
    /// inflates the value by that percentage (extra reagent to pipette).
    pub fn volume_line(&mut self, subject: &str, volume: Option<f64>, error_perc: Option<f64>) {
        let text = match volume {
            None => "NA".to_string(),
            Some(v) => {
                let v = match error_perc {
                    Some(p) => v * (1.0 + p / 100.0),
                    None => v,
                };
                fmt_round(v, 1)
            }
        };
        self.field(subject, &text);
    }

    pub fn render(&self) -> &str {
        &self.buf
    }

    /// Persist atomically, like the worklist itself.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gwl::{check_gwl_file, WATER_CONTACT_WET_SINGLE};

    #[test]
    fn transfer_emits_asp_disp_wash_triples() {
        let mut wl = Worklist::new();
        wl.comment("Samples");
        wl.transfer(
            Transfer {
                rack_label: Some("96-well [001]".to_string()),
                position: 5,
                volume: Some(5.0),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            Transfer {
                rack_label: Some("384 Well[002]".to_string()),
                position: 17,
                volume: Some(5.0),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
        );
        let text = wl.render();
        let lines: Vec<&str> = text.lines().map(|l| &l[..1]).collect();
        assert_eq!(lines, vec!["C", "A", "D", "W"]);
    }

    #[test]
    fn written_gwl_passes_the_validity_checker() {
        let mut wl = Worklist::new();
        wl.comment("Master mix");
        wl.distribute(
            distribution_for_wells("1x24 tube runner[001]", 1, "96-well [002]", &[1, 2, 3], 13.1)
                .unwrap(),
        );
        wl.transfer(Transfer::default(), Transfer::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.gwl");
        wl.write_gwl(&path).unwrap();
        check_gwl_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("W;\n"));
    }

    #[test]
    fn distribution_excludes_untargeted_wells_in_span() {
        let rd =
            distribution_for_wells("MM", 2, "384 Well[002]", &[3, 5, 6, 9], 20.0).unwrap();
        assert_eq!(rd.dest_pos_start, 3);
        assert_eq!(rd.dest_pos_end, 9);
        assert_eq!(rd.excluded_wells, vec![4, 7, 8]);
        assert_eq!(rd.src_pos_start, 2);
        assert_eq!(rd.src_pos_end, 2);
        assert!(distribution_for_wells("MM", 1, "x", &[], 20.0).is_none());
    }

    #[test]
    fn multi_dispense_count_follows_tip_capacity() {
        assert_eq!(max_multi_dispense(20.0), 10); // 200 ul tips
        assert_eq!(max_multi_dispense(180.0), 1); // still 200 ul tips
        assert_eq!(max_multi_dispense(181.0), 5); // 1000 ul tips
        assert_eq!(max_multi_dispense(250.0), 4);
        assert_eq!(max_multi_dispense(0.0), 1);
    }

    #[test]
    fn report_lines_round_to_one_decimal_with_surcharge() {
        let mut r = Report::new("PCR REPORT");
        r.field("Number of total rxns", "96");
        r.section("Total reagent volumes (ul)");
        r.volume_line("Master Mix", Some(1257.6), None);
        r.volume_line("Water", None, None);
        r.section("Total reagent volumes + 10% more (ul)");
        r.volume_line("Master Mix", Some(1257.6), Some(10.0));
        let text = r.render();
        assert!(text.starts_with("# PCR REPORT\n"));
        assert!(text.contains("Master Mix:\t1257.6\n"));
        assert!(text.contains("Water:\tNA\n"));
        assert!(text.contains("Master Mix:\t1383.4\n")); // 1257.6 * 1.1
    }
}
