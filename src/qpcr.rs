//! qPCR setup workflow: turn an exported plate layout (BioRad-style, with
//! added labware/volume columns) into a Fluent worklist plus a reagent
//! report.
//!
//! Emission order: mastermix(es) as one-asp-multi-disp distributions, then
//! samples, then water, each behind a `C;` section marker. Destinations come
//! straight from the layout's (row, column) coordinates; 384-well runs can
//! be traversal-reordered before emission.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::dest::LabwareMap;
use crate::gwl::{Transfer, WATER_CONTACT_WET_SINGLE};
use crate::plate::{self, PlateType};
use crate::table::{self, parse_opt_f64, parse_opt_u32, Table};
use crate::util;
use crate::worklist::{distribution_for_wells, Report, Worklist};

/// Columns the setup table must provide (capitalization-invariant).
const REQUIRED_COLUMNS: &[&str] = &[
    "row",
    "column",
    "sample type",
    "sample labware",
    "sample location",
    "sample volume",
    "mm name",
    "mm volume",
    "water volume",
];

/// Options for the qPCR workflow.
pub struct QpcrOpts {
    pub setup: PathBuf,
    pub prefix: String,
    /// Field delimiter of the setup file (layout exports commonly use `;`).
    pub delimiter: u8,
    pub src_type: PlateType,
    pub src_labware: LabwareMap,
    pub dest_type: PlateType,
    pub dest_labware: LabwareMap,
    /// Tube runner holding the mastermix tubes.
    pub mm_labware: String,
    /// Trough holding the water.
    pub water_labware: String,
    /// Apply the 384-well odd/even traversal optimization.
    pub reorder: bool,
    /// Extra reagent percentage in the report.
    pub error_perc: f64,
}

/// Paths of everything a workflow run wrote.
#[derive(Debug)]
pub struct RunOutputs {
    pub gwl: PathBuf,
    pub gwl_win: PathBuf,
    pub report: PathBuf,
    pub report_win: PathBuf,
    /// Destination allocation, for workflows that assign wells through the
    /// allocator (the qPCR layout dictates its own wells).
    pub allocation: Option<crate::dest::Allocation>,
}

struct SetupRow {
    dest_well: u32,
    sample_labware: Option<String>,
    sample_location: Option<u32>,
    sample_volume: Option<f64>,
    mm_name: String,
    mm_volume: Option<f64>,
    water_volume: Option<f64>,
}

fn collect_rows(table: &Table, opts: &QpcrOpts) -> anyhow::Result<Vec<SetupRow>> {
    let mut rows = Vec::with_capacity(table.len());
    for i in 0..table.len() {
        // plate coordinate -> linear destination well (fatal if off-plate)
        let row_cell = table.cell_named(i, "row")?.trim().to_string();
        let mut chars = row_cell.chars();
        let (Some(row_letter), None) = (chars.next(), chars.next()) else {
            bail!("line {}: plate row \"{}\" is not a single letter", i + 1, row_cell);
        };
        let Some(column) = parse_opt_u32(table.cell_named(i, "column")?) else {
            bail!("line {}: plate column \"{}\" is not a number", i + 1, table.cell_named(i, "column")?);
        };
        let dest_well = plate::to_linear_well(row_letter, column, opts.dest_type)?;

        // source labware names are rewritten through the source map;
        // an unmapped non-empty name is a configuration error
        let labware_cell = table.cell_named(i, "sample labware")?;
        let sample_labware = if labware_cell.is_empty() {
            None
        } else {
            Some(opts.src_labware.name_for_key(labware_cell)?.to_string())
        };

        let sample_location = parse_opt_u32(table.cell_named(i, "sample location")?);
        if let Some(loc) = sample_location {
            if loc < 1 {
                warn!(line = i + 1, "sample location is < 1");
            }
        }

        let vol = |name: &str| -> anyhow::Result<Option<f64>> {
            let v = parse_opt_f64(table.cell_named(i, name)?);
            if let Some(v) = v {
                if v < 0.0 {
                    warn!(line = i + 1, column = name, volume = v, "volume is < 0; ignoring");
                    return Ok(None);
                }
            }
            Ok(v)
        };

        rows.push(SetupRow {
            dest_well,
            sample_labware,
            sample_location: sample_location.filter(|&l| l >= 1),
            sample_volume: vol("sample volume")?,
            mm_name: table.cell_named(i, "mm name")?.to_string(),
            mm_volume: vol("mm volume")?,
            water_volume: vol("water volume")?,
        });
    }
    Ok(rows)
}

fn emit_mastermix(wl: &mut Worklist, rows: &[SetupRow], opts: &QpcrOpts, dest_label: &str) {
    // one distribution per mastermix name, tubes assigned in sorted-name order
    let mut groups: BTreeMap<&str, Vec<&SetupRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.mm_volume.is_some()) {
        groups.entry(row.mm_name.as_str()).or_default().push(row);
    }

    wl.comment("Master mix");
    for (tube, (name, group)) in groups.iter().enumerate() {
        let volume = group
            .iter()
            .filter_map(|r| r.mm_volume)
            .fold(f64::NEG_INFINITY, f64::max);
        if group.iter().any(|r| r.mm_volume != Some(volume)) {
            warn!(mastermix = *name, "mm volume differs between rows; using the maximum");
        }
        let wells: Vec<u32> = group.iter().map(|r| r.dest_well).collect();
        if let Some(rd) = distribution_for_wells(
            &opts.mm_labware,
            tube as u32 + 1,
            dest_label,
            &wells,
            volume,
        ) {
            wl.distribute(rd);
        }
    }
}

fn emit_samples(wl: &mut Worklist, rows: &[SetupRow], dest_label: &str) {
    wl.comment("Samples");
    for row in rows {
        let (Some(labware), Some(location), Some(volume)) = (
            row.sample_labware.as_deref(),
            row.sample_location,
            row.sample_volume,
        ) else {
            continue;
        };
        wl.transfer(
            Transfer {
                rack_label: Some(labware.to_string()),
                position: location,
                volume: Some(volume),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            Transfer {
                rack_label: Some(dest_label.to_string()),
                position: row.dest_well,
                volume: Some(volume),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
        );
    }
}

fn emit_water(wl: &mut Worklist, rows: &[SetupRow], opts: &QpcrOpts, dest_label: &str) {
    wl.comment("Water");
    for row in rows {
        let Some(volume) = row.water_volume.filter(|&v| v > 0.0) else {
            continue;
        };
        wl.transfer(
            Transfer {
                rack_label: Some(opts.water_labware.clone()),
                position: 1,
                volume: Some(volume),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            Transfer {
                rack_label: Some(dest_label.to_string()),
                position: row.dest_well,
                volume: Some(volume),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
        );
    }
}

fn build_report(rows: &[SetupRow], opts: &QpcrOpts) -> Report {
    let total_mm: f64 = rows.iter().filter_map(|r| r.mm_volume).sum();
    let total_water: f64 = rows.iter().filter_map(|r| r.water_volume).sum();

    let mut report = Report::new("qPCR REPORT");
    report.field("Number of total rxns", &rows.len().to_string());
    report.section("Total reagent volumes (ul)");
    report.volume_line("Master Mix", Some(total_mm), None);
    report.volume_line("Water", Some(total_water), None);
    report.section(&format!(
        "Total reagent volumes + {}% more (ul)",
        opts.error_perc
    ));
    report.volume_line("Master Mix", Some(total_mm), Some(opts.error_perc));
    report.volume_line("Water", Some(total_water), Some(opts.error_perc));
    report
}

/// Run the qPCR workflow end to end. All fatal checks happen before any
/// output file exists.
pub fn run(opts: &QpcrOpts) -> anyhow::Result<RunOutputs> {
    let table = table::load_table(&opts.setup, Some(opts.delimiter), true)
        .with_context(|| format!("loading {}", opts.setup.display()))?;
    table.require_columns(REQUIRED_COLUMNS)?;
    if table.is_empty() {
        bail!("setup table {} has no rows", opts.setup.display());
    }

    let mut rows = collect_rows(&table, opts)?;
    if opts.reorder {
        plate::reorder_for_throughput(&mut rows, opts.dest_type, |r| r.dest_well);
    }

    let dest_label = opts.dest_labware.name_for(opts.dest_type)?.to_string();
    let mut wl = Worklist::new();
    emit_mastermix(&mut wl, &rows, opts, &dest_label);
    emit_samples(&mut wl, &rows, &dest_label);
    emit_water(&mut wl, &rows, opts, &dest_label);
    let report = build_report(&rows, opts);

    let gwl = PathBuf::from(format!("{}.gwl", opts.prefix));
    wl.write_gwl(&gwl)?;
    let report_path = PathBuf::from(format!("{}_report.txt", opts.prefix));
    report.write(&report_path)?;
    let gwl_win = util::to_win(&gwl)?;
    let report_win = util::to_win(&report_path)?;

    info!(
        rxns = rows.len(),
        gwl = %gwl.display(),
        "qPCR worklist written"
    );
    Ok(RunOutputs {
        gwl,
        gwl_win,
        report: report_path,
        report_win,
        allocation: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gwl::{check_gwl, Command};
    use std::io::Write;

    fn opts(setup: PathBuf, prefix: String) -> QpcrOpts {
        QpcrOpts {
            setup,
            prefix,
            delimiter: b';',
            src_type: PlateType::Well96,
            src_labware: "96-well:96-well [001],384-well:384 Well[001],tube:1x24 tube runner"
                .parse()
                .unwrap(),
            dest_type: PlateType::Well384,
            dest_labware: "96-well:96-well [002],384-well:384 Well[002]"
                .parse()
                .unwrap(),
            mm_labware: "1x24 tube runner[001]".to_string(),
            water_labware: "100ml_1".to_string(),
            reorder: true,
            error_perc: 10.0,
        }
    }

    fn setup_file(dir: &std::path::Path) -> PathBuf {
        let p = dir.join("setup.csv");
        let mut f = std::fs::File::create(&p).unwrap();
        writeln!(f, "Row;Column;Sample Type;Sample Labware;Sample Location;Sample Volume;MM Name;MM Volume;Water Volume").unwrap();
        writeln!(f, "A;1;Unknown;96-well;1;5;mmA;13.1;4.9").unwrap();
        writeln!(f, "B;1;Unknown;96-well;2;5;mmA;13.1;4.9").unwrap();
        writeln!(f, "A;2;NTC;;;;mmB;18.1;4.9").unwrap();
        p
    }

    #[test]
    fn end_to_end_qpcr_run() {
        let dir = tempfile::tempdir().unwrap();
        let setup = setup_file(dir.path());
        let prefix = dir.path().join("TECAN_qPCR").to_string_lossy().to_string();
        let out = run(&opts(setup, prefix)).unwrap();

        let text = std::fs::read_to_string(&out.gwl).unwrap();
        check_gwl(text.as_bytes()).unwrap();

        // Sections in fixed order: mastermix, samples, water.
        let sections: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("C;"))
            .collect();
        assert_eq!(sections, vec!["C;Master mix", "C;Samples", "C;Water"]);

        // Two mastermixes -> two R lines, tube positions by sorted name.
        let r_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("R;")).collect();
        assert_eq!(r_lines.len(), 2);
        let rd_a = match Command::parse(r_lines[0]).unwrap() {
            Command::ReagentDistribution(rd) => rd,
            other => panic!("expected R line, got {other:?}"),
        };
        // mmA covers wells A1=1 and B1=2, from tube 1.
        assert_eq!(rd_a.src_pos_start, 1);
        assert_eq!(rd_a.dest_pos_start, 1);
        assert_eq!(rd_a.dest_pos_end, 2);

        // NTC row has no sample -> 2 sample transfers only.
        let asp_count = text.lines().filter(|l| l.starts_with("A;")).count();
        assert_eq!(asp_count, 2 + 3); // 2 samples + 3 water rows

        let report = std::fs::read_to_string(&out.report).unwrap();
        assert!(report.contains("Number of total rxns:\t3"));
        assert!(report.contains("Master Mix:\t44.3")); // 13.1 + 13.1 + 18.1

        assert!(out.gwl_win.exists() && out.report_win.exists());
    }

    #[test]
    fn off_plate_coordinates_abort_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.csv");
        let mut f = std::fs::File::create(&p).unwrap();
        writeln!(f, "Row;Column;Sample Type;Sample Labware;Sample Location;Sample Volume;MM Name;MM Volume;Water Volume").unwrap();
        writeln!(f, "Q;30;Unknown;96-well;1;5;mm;13.1;4.9").unwrap();
        drop(f);

        let prefix = dir.path().join("bad_run").to_string_lossy().to_string();
        let mut o = opts(p, prefix.clone());
        o.dest_type = PlateType::Well96;
        assert!(run(&o).is_err());
        assert!(!std::path::Path::new(&format!("{prefix}.gwl")).exists());
    }

    #[test]
    fn unmapped_source_labware_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.csv");
        let mut f = std::fs::File::create(&p).unwrap();
        writeln!(f, "Row;Column;Sample Type;Sample Labware;Sample Location;Sample Volume;MM Name;MM Volume;Water Volume").unwrap();
        writeln!(f, "A;1;Unknown;1536-well;1;5;mm;13.1;4.9").unwrap();
        drop(f);

        let prefix = dir.path().join("bad_run").to_string_lossy().to_string();
        let err = run(&opts(p, prefix)).unwrap_err();
        assert!(err.to_string().contains("1536-well"));
    }
}
