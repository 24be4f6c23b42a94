use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};

use fluentgen::dest::{assignments_frame, Allocation, LabwareMap};
use fluentgen::plate::PlateType;
use fluentgen::volume::{DilutionParams, ReactionRecipe};
use fluentgen::{amplicon, dilute, gwl, qpcr};

/// fluentgen CLI
#[derive(Parser)]
#[command(name = "fluentgen")]
#[command(version)]
#[command(about = "TECAN Fluent worklist generation from tabular lab inputs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create robot commands for qPCR setup from an exported plate layout
    Qpcr {
        /// Plate layout export with added labware/volume columns (CSV/TSV)
        setup: PathBuf,
        /// Output file name prefix
        #[arg(long, default_value = "TECAN_qPCR")]
        prefix: String,
        /// Field delimiter of the setup file (tab, comma, semicolon)
        #[arg(long, default_value = "semicolon")]
        sep: String,
        /// Source sample plate labware type
        #[arg(long, default_value = "96-well")]
        srctype: PlateType,
        /// Source labware names per labware type
        #[arg(
            long,
            default_value = "96-well:96-well [001],384-well:384 Well[001],tube:1x24 tube runner"
        )]
        srclabware: LabwareMap,
        /// Destination plate labware type
        #[arg(long, default_value = "384-well")]
        desttype: PlateType,
        /// Destination labware names per labware type
        #[arg(long, default_value = "96-well:96-well [002],384-well:384 Well[002]")]
        destlabware: LabwareMap,
        /// Tube runner holding the mastermix tubes
        #[arg(long, default_value = "1x24 tube runner[001]")]
        mmlabware: String,
        /// Trough holding the water
        #[arg(long, default_value = "100ml_1")]
        waterlabware: String,
        /// Skip the 384-well odd/even traversal optimization
        #[arg(long)]
        no_reorder: bool,
        /// Percent of extra total reagent volume in the report
        #[arg(long, default_value_t = 10.0)]
        errorperc: f64,
    },

    /// Convert a QIIME-style mapping file to an NGS amplicon PCR worklist
    Map {
        /// Mapping file with extra labware columns (tab-delimited)
        mapfile: PathBuf,
        /// Which rows to use ("all", "1-48", "1,3,5-6"; 1-indexed)
        #[arg(long, default_value = "all")]
        rows: String,
        /// Output file name prefix
        #[arg(long, default_value = "TECAN_NGS_amplicon")]
        prefix: String,
        /// Destination plate labware type
        #[arg(long, default_value = "96-well")]
        desttype: PlateType,
        /// Start well number on the destination plate
        #[arg(long, default_value_t = 1)]
        deststart: u32,
        /// Number of replicate PCRs per sample
        #[arg(long, default_value_t = 3)]
        rxns: u32,
        /// Destination labware names per labware type
        #[arg(long, default_value = "96-well:96 well[002],384-well:384 well[002]")]
        destlabware: LabwareMap,
        /// MasterMix tube number (1-24)
        #[arg(long, default_value_t = 1)]
        mmtube: u32,
        /// MasterMix volume per PCR (ul)
        #[arg(long, default_value_t = 13.1)]
        mmvolume: f64,
        /// Forward primer volume per PCR (ul)
        #[arg(long, default_value_t = 1.0)]
        fpvolume: f64,
        /// Forward primer tube number (if not in primer plate)
        #[arg(long, default_value_t = 2)]
        fptube: u32,
        /// Reverse primer volume per PCR (ul)
        #[arg(long, default_value_t = 1.0)]
        rpvolume: f64,
        /// Reverse primer tube number (if not in primer plate)
        #[arg(long, default_value_t = 3)]
        rptube: u32,
        /// Total volume per PCR (ul)
        #[arg(long, default_value_t = 25.0)]
        pcrvolume: f64,
        /// Tube runner holding mastermix and primer tubes
        #[arg(long, default_value = "1x24 tube runner[001]")]
        tubelabware: String,
        /// Trough holding the water
        #[arg(long, default_value = "100ml_1")]
        waterlabware: String,
        /// Percent of extra total reagent volume in the report
        #[arg(long, default_value_t = 10.0)]
        errorperc: f64,
        /// Skip the 384-well odd/even traversal optimization
        #[arg(long)]
        no_reorder: bool,
        /// Print the destination assignment table
        #[arg(long)]
        preview: bool,
    },

    /// Create a dilution worklist from a concentration table
    Dilute {
        /// Concentration table (tab-delimited by default)
        concfile: PathBuf,
        /// Field delimiter of the table (tab, comma, semicolon)
        #[arg(long, default_value = "tab")]
        sep: String,
        /// The file has no header row
        #[arg(long)]
        no_header: bool,
        /// Column containing the sample labware names (1-indexed)
        #[arg(long, default_value_t = 1)]
        labware: usize,
        /// Column containing the sample location numbers (1-indexed)
        #[arg(long, default_value_t = 2)]
        location: usize,
        /// Column containing the sample concentrations (1-indexed)
        #[arg(long, default_value_t = 3)]
        conc: usize,
        /// Which rows to use ("all", "1-48", "1,3,5-6"; 1-indexed)
        #[arg(long, default_value = "all")]
        rows: String,
        /// Target dilution concentration
        #[arg(long, default_value_t = 1.0)]
        dilution: f64,
        /// Minimum sample aliquot volume (ul)
        #[arg(long, default_value_t = 1.0)]
        minvolume: f64,
        /// Maximum sample aliquot volume (ul)
        #[arg(long, default_value_t = 100.0)]
        maxvolume: f64,
        /// Minimum total post-dilution volume per well (ul)
        #[arg(long, default_value_t = 10.0)]
        mintotal: f64,
        /// Physical max well volume of the destination plate (ul)
        #[arg(long, default_value_t = 280.0)]
        maxwellvolume: f64,
        /// Destination plate labware type
        #[arg(long, default_value = "96-well")]
        desttype: PlateType,
        /// Start well number on the destination plate
        #[arg(long, default_value_t = 1)]
        deststart: u32,
        /// Destination labware names per labware type
        #[arg(long, default_value = "96-well:96 Well[008],384-well:384 Well[004]")]
        destlabware: LabwareMap,
        /// Trough holding the dilutant
        #[arg(long, default_value = "100ml_1")]
        dilutantlabware: String,
        /// Output file name prefix
        #[arg(long, default_value = "TECAN_dilute")]
        prefix: String,
        /// Skip the 384-well odd/even traversal optimization
        #[arg(long)]
        no_reorder: bool,
        /// Print the destination assignment table
        #[arg(long)]
        preview: bool,
    },

    /// Validate an existing gwl file
    Check {
        /// The gwl file to validate
        file: PathBuf,
    },
}

fn parse_sep(s: &str) -> anyhow::Result<u8> {
    match s.to_ascii_lowercase().as_str() {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "semicolon" | ";" => Ok(b';'),
        other => bail!("unknown delimiter \"{other}\" (use tab, comma or semicolon)"),
    }
}

fn print_preview(alloc: &Allocation) -> anyhow::Result<()> {
    let df = assignments_frame(&alloc.assignments)?;

    // Configure Polars display to show all rows and full cell width.
    std::env::set_var("POLARS_FMT_MAX_ROWS", "1000000");
    std::env::set_var("POLARS_FMT_STR_LEN", "100000");
    println!("{}", df);

    if alloc.truncated() {
        eprintln!(
            "WARNING: not enough wells; {} of {} assignments produced",
            alloc.assignments.len(),
            alloc.requested
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Qpcr {
            setup,
            prefix,
            sep,
            srctype,
            srclabware,
            desttype,
            destlabware,
            mmlabware,
            waterlabware,
            no_reorder,
            errorperc,
        } => {
            let opts = qpcr::QpcrOpts {
                setup,
                prefix,
                delimiter: parse_sep(&sep)?,
                src_type: srctype,
                src_labware: srclabware,
                dest_type: desttype,
                dest_labware: destlabware,
                mm_labware: mmlabware,
                water_labware: waterlabware,
                reorder: !no_reorder,
                error_perc: errorperc,
            };
            let out = qpcr::run(&opts)?;
            println!("{}", out.gwl.display());
            println!("{}", out.report.display());
        }

        Commands::Map {
            mapfile,
            rows,
            prefix,
            desttype,
            deststart,
            rxns,
            destlabware,
            mmtube,
            mmvolume,
            fpvolume,
            fptube,
            rpvolume,
            rptube,
            pcrvolume,
            tubelabware,
            waterlabware,
            errorperc,
            no_reorder,
            preview,
        } => {
            let opts = amplicon::MapOpts {
                mapfile,
                rows,
                prefix,
                dest_type: desttype,
                dest_labware: destlabware,
                dest_start: deststart,
                rxns,
                mm_tube: mmtube,
                fp_tube: fptube,
                rp_tube: rptube,
                recipe: ReactionRecipe {
                    total_volume: pcrvolume,
                    mastermix_volume: mmvolume,
                    fp_volume: fpvolume,
                    rp_volume: rpvolume,
                },
                tube_labware: tubelabware,
                water_labware: waterlabware,
                error_perc: errorperc,
                reorder: !no_reorder,
            };
            let out = amplicon::run(&opts)?;
            if preview {
                if let Some(alloc) = &out.allocation {
                    print_preview(alloc)?;
                }
            }
            println!("{}", out.gwl.display());
            println!("{}", out.report.display());
        }

        Commands::Dilute {
            concfile,
            sep,
            no_header,
            labware,
            location,
            conc,
            rows,
            dilution,
            minvolume,
            maxvolume,
            mintotal,
            maxwellvolume,
            desttype,
            deststart,
            destlabware,
            dilutantlabware,
            prefix,
            no_reorder,
            preview,
        } => {
            let opts = dilute::DiluteOpts {
                concfile,
                prefix,
                delimiter: parse_sep(&sep)?,
                header: !no_header,
                labware_col: labware,
                location_col: location,
                conc_col: conc,
                rows,
                params: DilutionParams {
                    target_conc: dilution,
                    min_sample_vol: minvolume,
                    max_sample_vol: maxvolume,
                    min_total_vol: mintotal,
                    max_well_vol: maxwellvolume,
                },
                dest_type: desttype,
                dest_labware: destlabware,
                dest_start: deststart,
                dilutant_labware: dilutantlabware,
                reorder: !no_reorder,
            };
            let out = dilute::run(&opts)?;
            if preview {
                if let Some(alloc) = &out.allocation {
                    print_preview(alloc)?;
                }
            }
            println!("{}", out.gwl.display());
            println!("{}", out.report.display());
        }

        Commands::Check { file } => {
            gwl::check_gwl_file(&file)?;
            println!("{}: OK", file.display());
        }
    }

    Ok(())
}
