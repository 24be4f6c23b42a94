//! Sample dilution workflow: bring every sample in a concentration table
//! down to a target concentration by pairing a sample aliquot with a
//! dilutant top-up in a fresh destination plate.
//!
//! The concentration file is positional (configurable 1-indexed columns for
//! labware, location and concentration), optionally headerless. Rows with
//! unusable data (missing location, concentration <= 0) are warned about and
//! skipped; physically infeasible dilution parameters abort the run.

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::dest::{self, LabwareMap};
use crate::gwl::{Transfer, WATER_CONTACT_WET_SINGLE};
use crate::plate::{self, PlateType};
use crate::qpcr::RunOutputs;
use crate::table::{self, parse_opt_f64, parse_opt_u32};
use crate::util;
use crate::volume::{dilution_plan, DilutionParams, VolumePlan};
use crate::worklist::{Report, Worklist};

/// Options for the dilution workflow.
pub struct DiluteOpts {
    pub concfile: PathBuf,
    pub prefix: String,
    pub delimiter: u8,
    /// Whether the file carries a header row.
    pub header: bool,
    /// 1-indexed column positions in the concentration file.
    pub labware_col: usize,
    pub location_col: usize,
    pub conc_col: usize,
    /// Row selection spec (`"all"`, `"1-48"`, ...; 1-indexed).
    pub rows: String,
    pub params: DilutionParams,
    pub dest_type: PlateType,
    pub dest_labware: LabwareMap,
    pub dest_start: u32,
    /// Trough holding the dilutant.
    pub dilutant_labware: String,
    pub reorder: bool,
}

struct ConcRow {
    labware: String,
    location: u32,
    conc: f64,
}

fn collect_rows(opts: &DiluteOpts) -> anyhow::Result<Vec<ConcRow>> {
    if opts.labware_col < 1 || opts.location_col < 1 || opts.conc_col < 1 {
        bail!("column positions are 1-indexed and must be >= 1");
    }
    let mut table = table::load_table(&opts.concfile, Some(opts.delimiter), opts.header)
        .with_context(|| format!("loading {}", opts.concfile.display()))?;
    if let Some(keep) = util::make_range(&opts.rows, true)? {
        table.select_rows(&keep)?;
    }

    let mut rows = Vec::with_capacity(table.len());
    for i in 0..table.len() {
        let labware = table.cell(i, opts.labware_col - 1).to_string();
        let location = parse_opt_u32(table.cell(i, opts.location_col - 1));
        let conc = parse_opt_f64(table.cell(i, opts.conc_col - 1));

        let (Some(location), Some(conc)) = (location, conc) else {
            warn!(line = i + 1, "unusable row (missing location or concentration); skipping");
            continue;
        };
        if location < 1 {
            warn!(line = i + 1, "location is < 1; skipping");
            continue;
        }
        if conc <= 0.0 {
            warn!(line = i + 1, conc, "concentration is <= 0; skipping");
            continue;
        }
        if labware.is_empty() {
            warn!(line = i + 1, "empty labware name; skipping");
            continue;
        }
        rows.push(ConcRow {
            labware,
            location,
            conc,
        });
    }
    if rows.is_empty() {
        bail!("no usable rows in {}", opts.concfile.display());
    }
    Ok(rows)
}

struct Dilution<'a> {
    row: &'a ConcRow,
    plan: VolumePlan,
    well: u32,
}

fn emit(wl: &mut Worklist, dilutions: &[Dilution], opts: &DiluteOpts, dest_label: &str) {
    wl.comment("Samples");
    for d in dilutions {
        wl.transfer(
            Transfer {
                rack_label: Some(d.row.labware.clone()),
                position: d.row.location,
                volume: Some(d.plan.sample),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            Transfer {
                rack_label: Some(dest_label.to_string()),
                position: d.well,
                volume: Some(d.plan.sample),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
        );
    }

    wl.comment("Dilutant");
    for d in dilutions.iter().filter(|d| d.plan.diluent > 0.0) {
        wl.transfer(
            Transfer {
                rack_label: Some(opts.dilutant_labware.clone()),
                position: 1,
                volume: Some(d.plan.diluent),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            Transfer {
                rack_label: Some(dest_label.to_string()),
                position: d.well,
                volume: Some(d.plan.diluent),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
        );
    }
}

fn build_report(dilutions: &[Dilution], truncated_by: usize, opts: &DiluteOpts) -> Report {
    let total_sample: f64 = dilutions.iter().map(|d| d.plan.sample).sum();
    let total_diluent: f64 = dilutions.iter().map(|d| d.plan.diluent).sum();

    let mut report = Report::new("DILUTION REPORT");
    report.field("Number of samples", &dilutions.len().to_string());
    report.field(
        "Target concentration",
        &format!("{}", opts.params.target_conc),
    );
    if truncated_by > 0 {
        report.field(
            "WARNING",
            &format!("not enough destination wells; {truncated_by} sample(s) dropped"),
        );
    }
    report.section("Total volumes (ul)");
    report.volume_line("Sample", Some(total_sample), None);
    report.volume_line("Dilutant", Some(total_diluent), None);
    report
}

/// Run the dilution workflow end to end.
pub fn run(opts: &DiluteOpts) -> anyhow::Result<RunOutputs> {
    if opts.params.target_conc <= 0.0 {
        bail!("target concentration must be > 0");
    }
    if opts.params.min_sample_vol < 0.0 || opts.params.max_sample_vol <= 0.0 {
        bail!("sample volume bounds must be positive");
    }

    let rows = collect_rows(opts)?;
    let concs: Vec<f64> = rows.iter().map(|r| r.conc).collect();
    let plans = dilution_plan(&concs, &opts.params)?;

    // one destination well per surviving input row, in input order
    let samples: Vec<String> = rows
        .iter()
        .map(|r| format!("{}:{}", r.labware, r.location))
        .collect();
    let alloc = dest::assign_destinations(
        &samples,
        1,
        &opts.dest_labware,
        opts.dest_type,
        opts.dest_start,
    )?;
    let truncated_by = alloc.requested - alloc.assignments.len();

    let mut dilutions: Vec<Dilution> = alloc
        .assignments
        .iter()
        .enumerate()
        .map(|(i, a)| Dilution {
            row: &rows[i],
            plan: plans[i],
            well: a.well,
        })
        .collect();
    if opts.reorder {
        plate::reorder_for_throughput(&mut dilutions, opts.dest_type, |d| d.well);
    }

    let dest_label = opts.dest_labware.name_for(opts.dest_type)?.to_string();
    let mut wl = Worklist::new();
    emit(&mut wl, &dilutions, opts, &dest_label);
    let report = build_report(&dilutions, truncated_by, opts);

    let gwl = PathBuf::from(format!("{}.gwl", opts.prefix));
    wl.write_gwl(&gwl)?;
    let report_path = PathBuf::from(format!("{}_report.txt", opts.prefix));
    report.write(&report_path)?;
    let gwl_win = util::to_win(&gwl)?;
    let report_win = util::to_win(&report_path)?;

    info!(
        samples = dilutions.len(),
        truncated_by,
        gwl = %gwl.display(),
        "dilution worklist written"
    );
    Ok(RunOutputs {
        gwl,
        gwl_win,
        report: report_path,
        report_win,
        allocation: Some(alloc),
    })
}
