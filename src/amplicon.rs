//! NGS amplicon PCR prep workflow: convert a QIIME-style mapping file (with
//! extra labware columns) into a Fluent worklist that combines mastermix,
//! primers, samples and a water top-up per reaction.
//!
//! Each sample gets `rxns` replicate reactions, placed contiguously from the
//! configured start well; overflowing a plate truncates (and is reported)
//! rather than failing. Forward primers come from a tube; reverse primers
//! come from a barcoded primer plate when the row names one, otherwise from
//! a tube.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::dest::{self, LabwareMap};
use crate::gwl::{Transfer, WATER_CONTACT_WET_SINGLE};
use crate::plate::{self, PlateType};
use crate::qpcr::RunOutputs;
use crate::table::{self, parse_opt_f64, parse_opt_u32, Table};
use crate::util;
use crate::volume::{water_volume, ReactionRecipe};
use crate::worklist::{distribution_for_wells, Report, Worklist};

/// Extra columns the mapping file must provide beyond the leading
/// `#SampleID` / barcode columns.
const REQUIRED_COLUMNS: &[&str] = &[
    "sample_labware",
    "sample_location",
    "primer_labware",
    "primer_location",
    "sample_rxn_volume",
];

/// Options for the amplicon prep workflow.
pub struct MapOpts {
    pub mapfile: PathBuf,
    /// Row selection spec (`"all"`, `"1-48"`, `"1,3,5-6"`; 1-indexed).
    pub rows: String,
    pub prefix: String,
    pub dest_type: PlateType,
    pub dest_labware: LabwareMap,
    pub dest_start: u32,
    /// Replicate PCRs per sample.
    pub rxns: u32,
    pub mm_tube: u32,
    pub fp_tube: u32,
    pub rp_tube: u32,
    pub recipe: ReactionRecipe,
    /// Tube runner holding mastermix and non-barcoded primers.
    pub tube_labware: String,
    /// Trough holding the water.
    pub water_labware: String,
    pub error_perc: f64,
    pub reorder: bool,
}

struct MapRow {
    sample: String,
    sample_labware: String,
    sample_location: u32,
    primer_labware: Option<String>,
    primer_location: Option<u32>,
    sample_rxn_volume: f64,
}

fn check_tubes(opts: &MapOpts) -> anyhow::Result<()> {
    for (reagent, tube) in [
        ("MasterMix", opts.mm_tube),
        ("Forward primer", opts.fp_tube),
        ("Reverse primer", opts.rp_tube),
    ] {
        if !(1..=24).contains(&tube) {
            return Err(crate::error::FluentError::TubeOutOfRange { reagent, tube }.into());
        }
    }
    Ok(())
}

fn warn_duplicates(table: &Table, column: usize, what: &str) {
    let mut seen = HashSet::new();
    let dups = (0..table.len())
        .filter(|&i| !seen.insert(table.cell(i, column).to_string()))
        .count();
    if dups > 0 {
        warn!(count = dups, "duplicated {what} values in the mapping file");
    }
}

fn collect_rows(table: &Table, opts: &MapOpts) -> anyhow::Result<Vec<MapRow>> {
    let mut rows = Vec::with_capacity(table.len());
    for i in 0..table.len() {
        let sample = table.cell(i, 0).to_string();
        if sample.is_empty() {
            bail!("line {}: empty sample identifier", i + 1);
        }
        let sample_labware = table.cell_named(i, "sample_labware")?.to_string();
        if sample_labware.is_empty() {
            bail!("line {}: empty sample_labware", i + 1);
        }
        let Some(sample_location) = parse_opt_u32(table.cell_named(i, "sample_location")?)
        else {
            bail!("line {}: sample_location is not a number", i + 1);
        };
        if sample_location < 1 {
            warn!(line = i + 1, "sample_location is < 1");
        }
        let Some(sample_rxn_volume) = parse_opt_f64(table.cell_named(i, "sample_rxn_volume")?)
        else {
            bail!("line {}: sample_rxn_volume is not a number", i + 1);
        };
        if sample_rxn_volume < 0.0 {
            bail!("line {}: sample volume < 0", i + 1);
        }
        if sample_rxn_volume > opts.recipe.mastermix_volume {
            warn!(line = i + 1, "sample volume > mastermix volume");
        }

        let primer_labware = Some(table.cell_named(i, "primer_labware")?.to_string())
            .filter(|s| !s.is_empty());
        let primer_location = parse_opt_u32(table.cell_named(i, "primer_location")?);

        rows.push(MapRow {
            sample,
            sample_labware,
            sample_location,
            primer_labware,
            primer_location,
            sample_rxn_volume,
        });
    }
    Ok(rows)
}

/// Assignment joined back to its source row, plus the per-reaction water.
struct Reaction<'a> {
    row: &'a MapRow,
    well: u32,
    water: f64,
}

fn emit(wl: &mut Worklist, reactions: &[Reaction], opts: &MapOpts, dest_label: &str) {
    // mastermix: one aspirate, many dispenses
    wl.comment("Master mix");
    let wells: Vec<u32> = reactions.iter().map(|r| r.well).collect();
    if let Some(rd) = distribution_for_wells(
        &opts.tube_labware,
        opts.mm_tube,
        dest_label,
        &wells,
        opts.recipe.mastermix_volume,
    ) {
        wl.distribute(rd);
    }

    let disp = |well: u32, volume: f64, liquid_class: &str| Transfer {
        rack_label: Some(dest_label.to_string()),
        position: well,
        volume: Some(volume),
        liquid_class: liquid_class.to_string(),
        ..Transfer::default()
    };
    let tube_asp = |tube: u32, volume: f64| Transfer {
        rack_label: Some(opts.tube_labware.clone()),
        position: tube,
        volume: Some(volume),
        ..Transfer::default()
    };

    // primers: tube-sourced first (forward for every reaction, reverse for
    // rows without a primer plate), then the plate-sourced barcoded ones
    wl.comment("Primers");
    for r in reactions {
        wl.transfer(
            tube_asp(opts.fp_tube, opts.recipe.fp_volume),
            disp(r.well, opts.recipe.fp_volume, crate::gwl::WATER_FREE_SINGLE),
        );
        if r.row.primer_labware.is_none() {
            wl.transfer(
                tube_asp(opts.rp_tube, opts.recipe.rp_volume),
                disp(r.well, opts.recipe.rp_volume, crate::gwl::WATER_FREE_SINGLE),
            );
        }
    }
    for r in reactions {
        let (Some(labware), Some(location)) =
            (r.row.primer_labware.as_deref(), r.row.primer_location)
        else {
            continue;
        };
        wl.transfer(
            Transfer {
                rack_label: Some(labware.to_string()),
                position: location,
                volume: Some(opts.recipe.rp_volume),
                ..Transfer::default()
            },
            disp(r.well, opts.recipe.rp_volume, crate::gwl::WATER_FREE_SINGLE),
        );
    }

    // samples
    wl.comment("Samples");
    for r in reactions {
        wl.transfer(
            Transfer {
                rack_label: Some(r.row.sample_labware.clone()),
                position: r.row.sample_location,
                volume: Some(r.row.sample_rxn_volume),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            disp(r.well, r.row.sample_rxn_volume, WATER_CONTACT_WET_SINGLE),
        );
    }

    // water top-up
    wl.comment("Water");
    for r in reactions.iter().filter(|r| r.water > 0.0) {
        wl.transfer(
            Transfer {
                rack_label: Some(opts.water_labware.clone()),
                position: 1,
                volume: Some(r.water),
                liquid_class: WATER_CONTACT_WET_SINGLE.to_string(),
                ..Transfer::default()
            },
            disp(r.well, r.water, WATER_CONTACT_WET_SINGLE),
        );
    }
}

fn build_report(reactions: &[Reaction], truncated_by: usize, opts: &MapOpts) -> Report {
    let n = reactions.len() as f64;
    let total_mm = opts.recipe.mastermix_volume * n;
    let total_fp = opts.recipe.fp_volume * n;
    let total_rp = opts.recipe.rp_volume * n;
    let total_sample: f64 = reactions.iter().map(|r| r.row.sample_rxn_volume).sum();
    let total_water: f64 = reactions.iter().map(|r| r.water).sum();

    let mut report = Report::new("NGS AMPLICON PCR REPORT");
    report.field("Number of total rxns", &reactions.len().to_string());
    if truncated_by > 0 {
        report.field(
            "WARNING",
            &format!("not enough destination wells; {truncated_by} reaction(s) dropped"),
        );
    }
    report.section("Total reagent volumes (ul)");
    report.volume_line("Master Mix", Some(total_mm), None);
    report.volume_line("Forward primer", Some(total_fp), None);
    report.volume_line("Reverse primer", Some(total_rp), None);
    report.volume_line("Sample", Some(total_sample), None);
    report.volume_line("Water", Some(total_water), None);
    report.section(&format!(
        "Total reagent volumes + {}% more (ul)",
        opts.error_perc
    ));
    report.volume_line("Master Mix", Some(total_mm), Some(opts.error_perc));
    report.volume_line("Forward primer", Some(total_fp), Some(opts.error_perc));
    report.volume_line("Reverse primer", Some(total_rp), Some(opts.error_perc));
    report.volume_line("Water", Some(total_water), Some(opts.error_perc));
    report
}

/// Run the amplicon prep workflow end to end.
pub fn run(opts: &MapOpts) -> anyhow::Result<RunOutputs> {
    check_tubes(opts)?;
    opts.recipe.validate()?;
    if opts.recipe.mastermix_volume > opts.recipe.total_volume / 2.0 {
        warn!("MasterMix volume > half of the reaction volume");
    }

    let mut table = table::load_table(&opts.mapfile, Some(b'\t'), true)
        .with_context(|| format!("loading {}", opts.mapfile.display()))?;
    if let Some(keep) = util::make_range(&opts.rows, true)? {
        table.select_rows(&keep)?;
    }
    table.require_columns(REQUIRED_COLUMNS)?;
    if table.is_empty() {
        bail!("mapping file {} has no rows", opts.mapfile.display());
    }
    warn_duplicates(&table, 0, "sample");
    warn_duplicates(&table, 1, "barcode");

    let rows = collect_rows(&table, opts)?;

    let samples: Vec<String> = rows.iter().map(|r| r.sample.clone()).collect();
    let alloc = dest::assign_destinations(
        &samples,
        opts.rxns,
        &opts.dest_labware,
        opts.dest_type,
        opts.dest_start,
    )?;
    let truncated_by = alloc.requested - alloc.assignments.len();

    // join assignments back to their source rows; the allocator walks the
    // sample list in order, so index arithmetic is enough
    let mut reactions: Vec<Reaction> = Vec::with_capacity(alloc.assignments.len());
    for (i, a) in alloc.assignments.iter().enumerate() {
        let row = &rows[i / opts.rxns as usize];
        debug_assert_eq!(row.sample, a.sample);
        let water = water_volume(&opts.recipe, row.sample_rxn_volume, i)?;
        reactions.push(Reaction {
            row,
            well: a.well,
            water,
        });
    }
    if opts.reorder {
        plate::reorder_for_throughput(&mut reactions, opts.dest_type, |r| r.well);
    }

    let dest_label = opts.dest_labware.name_for(opts.dest_type)?.to_string();
    let mut wl = Worklist::new();
    emit(&mut wl, &reactions, opts, &dest_label);
    let report = build_report(&reactions, truncated_by, opts);

    let gwl = PathBuf::from(format!("{}.gwl", opts.prefix));
    wl.write_gwl(&gwl)?;
    let report_path = PathBuf::from(format!("{}_report.txt", opts.prefix));
    report.write(&report_path)?;
    let gwl_win = util::to_win(&gwl)?;
    let report_win = util::to_win(&report_path)?;

    info!(
        rxns = reactions.len(),
        truncated_by,
        gwl = %gwl.display(),
        "amplicon worklist written"
    );
    Ok(RunOutputs {
        gwl,
        gwl_win,
        report: report_path,
        report_win,
        allocation: Some(alloc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gwl::check_gwl;
    use std::io::Write;

    fn mapfile(dir: &std::path::Path, rows: &[&str]) -> PathBuf {
        let p = dir.join("map.txt");
        let mut f = std::fs::File::create(&p).unwrap();
        writeln!(
            f,
            "#SampleID\tBarcode\tsample_labware\tsample_location\tprimer_labware\tprimer_location\tsample_rxn_volume"
        )
        .unwrap();
        for r in rows {
            writeln!(f, "{r}").unwrap();
        }
        p
    }

    fn opts(mapfile: PathBuf, prefix: String) -> MapOpts {
        MapOpts {
            mapfile,
            rows: "all".to_string(),
            prefix,
            dest_type: PlateType::Well96,
            dest_labware: "96-well:96 well[002],384-well:384 well[002]"
                .parse()
                .unwrap(),
            dest_start: 1,
            rxns: 3,
            mm_tube: 1,
            fp_tube: 2,
            rp_tube: 3,
            recipe: ReactionRecipe {
                total_volume: 25.0,
                mastermix_volume: 13.1,
                fp_volume: 1.0,
                rp_volume: 1.0,
            },
            tube_labware: "1x24 tube runner[001]".to_string(),
            water_labware: "100ml_1".to_string(),
            error_perc: 10.0,
            reorder: false,
        }
    }

    #[test]
    fn end_to_end_amplicon_run() {
        let dir = tempfile::tempdir().unwrap();
        let p = mapfile(
            dir.path(),
            &[
                "s1\tBC01\t96 well[001]\t1\tprimer plate[001]\t1\t5",
                "s2\tBC02\t96 well[001]\t2\t\t\t5",
            ],
        );
        let prefix = dir.path().join("TECAN_NGS").to_string_lossy().to_string();
        let out = run(&opts(p, prefix)).unwrap();

        let text = std::fs::read_to_string(&out.gwl).unwrap();
        check_gwl(text.as_bytes()).unwrap();
        let sections: Vec<&str> = text.lines().filter(|l| l.starts_with("C;")).collect();
        assert_eq!(
            sections,
            vec!["C;Master mix", "C;Primers", "C;Samples", "C;Water"]
        );

        // 2 samples x 3 replicates = 6 reactions.
        // Primers: 6 forward + 3 tube reverse (s2) + 3 plate reverse (s1).
        // Samples: 6, Water: 6. Mastermix is a single R line.
        let asp = text.lines().filter(|l| l.starts_with("A;")).count();
        assert_eq!(asp, 6 + 3 + 3 + 6 + 6);
        assert_eq!(text.lines().filter(|l| l.starts_with("R;")).count(), 1);
        // single-use tips: every A/D pair is followed by a wash
        assert_eq!(
            text.lines().filter(|l| *l == "W;").count(),
            asp
        );

        // water volume per reaction: 25 - (5 + 13.1 + 1 + 1) = 4.9
        assert!(text.contains(";4.9;"));

        let report = std::fs::read_to_string(&out.report).unwrap();
        assert!(report.contains("Number of total rxns:\t6"));
        assert!(report.contains("Master Mix:\t78.6")); // 13.1 * 6
    }

    #[test]
    fn truncation_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = mapfile(
            dir.path(),
            &[
                "s1\tBC01\t96 well[001]\t1\t\t\t5",
                "s2\tBC02\t96 well[001]\t2\t\t\t5",
            ],
        );
        let prefix = dir.path().join("trunc").to_string_lossy().to_string();
        let mut o = opts(p, prefix);
        o.dest_start = 93; // room for 4 of the 6 reactions
        let out = run(&o).unwrap();
        let report = std::fs::read_to_string(&out.report).unwrap();
        assert!(report.contains("Number of total rxns:\t4"));
        assert!(report.contains("2 reaction(s) dropped"));
    }

    #[test]
    fn negative_water_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let p = mapfile(dir.path(), &["s1\tBC01\t96 well[001]\t1\t\t\t20"]);
        let prefix = dir.path().join("neg").to_string_lossy().to_string();
        let err = run(&opts(p, prefix.clone())).unwrap_err();
        assert!(err.to_string().contains("negative water volume"));
        assert!(!std::path::Path::new(&format!("{prefix}.gwl")).exists());
    }

    #[test]
    fn bad_tube_numbers_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = mapfile(dir.path(), &["s1\tBC01\t96 well[001]\t1\t\t\t5"]);
        let prefix = dir.path().join("tube").to_string_lossy().to_string();
        let mut o = opts(p, prefix);
        o.mm_tube = 25;
        let err = run(&o).unwrap_err();
        assert!(err.to_string().contains("1-24"));
    }

    #[test]
    fn row_selection_limits_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let p = mapfile(
            dir.path(),
            &[
                "s1\tBC01\t96 well[001]\t1\t\t\t5",
                "s2\tBC02\t96 well[001]\t2\t\t\t5",
                "s3\tBC03\t96 well[001]\t3\t\t\t5",
            ],
        );
        let prefix = dir.path().join("rowsel").to_string_lossy().to_string();
        let mut o = opts(p, prefix);
        o.rows = "1,3".to_string();
        o.rxns = 1;
        let out = run(&o).unwrap();
        let report = std::fs::read_to_string(&out.report).unwrap();
        assert!(report.contains("Number of total rxns:\t2"));
        let text = std::fs::read_to_string(&out.gwl).unwrap();
        assert!(text.contains("96 well[001];;;1;"));
        assert!(text.contains("96 well[001];;;3;"));
        assert!(!text.contains("96 well[001];;;2;"));
    }
}
