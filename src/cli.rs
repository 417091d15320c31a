//
// cli.rs
// Odf-Tools-rs
//
// Defines the CLI surface with Clap, sets up logging, and dispatches commands to the conversion pipelines.
//
// Thales Matheus Mendonça Santos - November 2025

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::forward::{self, ForwardRequest};
use crate::models::{ConversionKind, ConversionSummary};
use crate::odf_table::{OdfGeometry, DEFAULT_DISCRETIZATION, DEFAULT_TABLE_FILE};
use crate::peaks::{LocalMaximaPeakFinder, DEFAULT_FIBERS};
use crate::reverse::{self, ReverseRequest};
use crate::scratch::ScratchDir;
use crate::tools::ToolConfig;
use crate::{batch, inspect, report};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "odf-tools")]
#[command(about = "Convert ODFs between DSI Studio fib files and MRtrix3 SH images", long_about = None)]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a DSI Studio fib file to MRtrix3 spherical harmonics (runs amp2sh)
    ToMrtrix {
        fib: PathBuf,
        /// Image on the fib grid supplying the output header and affine
        #[arg(short, long)]
        reference: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "amp2sh")]
        amp2sh: PathBuf,
        /// Seconds to wait for the external tool; 0 waits forever
        #[arg(long, default_value_t = 3600)]
        tool_timeout: u64,
        /// Write a JSON report here after success
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Convert MRtrix3 spherical harmonics to a DSI Studio fib file (runs sh2amp)
    ToFib {
        sh: PathBuf,
        #[arg(short, long)]
        mask: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Peaks kept per voxel
        #[arg(short = 'n', long, default_value_t = DEFAULT_FIBERS)]
        fibers: usize,
        /// MAT file holding `<name>_vertices` and `<name>_faces`
        #[arg(long, default_value = DEFAULT_TABLE_FILE)]
        odf_table: PathBuf,
        #[arg(long, default_value = DEFAULT_DISCRETIZATION)]
        discretization: String,
        #[arg(long, default_value = "sh2amp")]
        sh2amp: PathBuf,
        #[arg(long, default_value_t = 3600)]
        tool_timeout: u64,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Describe the contents of a fib file
    Info {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Batch processing over a directory of fib files
    Batch {
        #[arg(short, long)]
        directory: PathBuf,
        #[arg(short, long, value_enum)]
        operation: BatchOperation,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum BatchOperation {
    Info,
    Validate,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing(verbose: u8) {
    // Ignore the error if a subscriber is already installed (tests, embedding).
    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level(verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Drops `work` on Ctrl-C; scratch files and running tools are cleaned up with it.
async fn cancellable<T>(work: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => bail!("Interrupted, conversion cancelled"),
    }
}

pub async fn convert_to_mrtrix(
    request: &ForwardRequest,
    tools: &ToolConfig,
) -> anyhow::Result<ConversionSummary> {
    let scratch = ScratchDir::near(&request.output).context("Failed to create scratch directory")?;
    forward::fib_to_mrtrix(request, tools, &scratch)
        .await
        .with_context(|| format!("Failed to convert {:?} to MRtrix3", request.fib))
}

pub async fn convert_to_fib(
    request: &ReverseRequest,
    table: &Path,
    discretization: &str,
    tools: &ToolConfig,
) -> anyhow::Result<ConversionSummary> {
    let geometry = OdfGeometry::load(table, discretization)
        .with_context(|| format!("Failed to load ODF geometry from {:?}", table))?;
    let finder = Arc::new(LocalMaximaPeakFinder::new(&geometry));
    let scratch = ScratchDir::near(&request.output).context("Failed to create scratch directory")?;
    reverse::mrtrix_to_fib(request, &geometry, finder, tools, &scratch)
        .await
        .with_context(|| format!("Failed to convert {:?} to a fib file", request.sh_image))
}

fn print_summary(output: &Path, summary: &ConversionSummary) {
    println!("Saved {:?}", output);
    println!("  Dimension:  {:?}", summary.dimension);
    println!("  Foreground: {} voxels", summary.foreground_voxels);
    println!("  Directions: {}", summary.directions);
    println!("  ODF splits: {}", summary.odf_splits);
    if let Some(fibers) = summary.fibers {
        println!("  Fibers:     {}", fibers);
    }
}

pub async fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::ToMrtrix {
            fib,
            reference,
            output,
            amp2sh,
            tool_timeout,
            report: report_path,
        } => {
            let tools = ToolConfig {
                amp2sh,
                ..ToolConfig::default()
            }
            .with_timeout_secs(tool_timeout);
            let request = ForwardRequest {
                fib,
                reference,
                output,
            };
            let summary = cancellable(convert_to_mrtrix(&request, &tools)).await?;
            print_summary(&request.output, &summary);
            if let Some(path) = report_path {
                let inputs = vec![request.fib.clone(), request.reference.clone()];
                let report = report::build_report(ConversionKind::FibToMrtrix, inputs, &request.output, summary)?;
                report::write_report(&path, &report)?;
            }
        }
        Commands::ToFib {
            sh,
            mask,
            output,
            fibers,
            odf_table,
            discretization,
            sh2amp,
            tool_timeout,
            report: report_path,
        } => {
            if fibers == 0 {
                bail!("Number of fibers must be greater than zero");
            }
            let tools = ToolConfig {
                sh2amp,
                ..ToolConfig::default()
            }
            .with_timeout_secs(tool_timeout);
            let request = ReverseRequest {
                sh_image: sh,
                mask,
                output,
                fibers,
            };
            let summary =
                cancellable(convert_to_fib(&request, &odf_table, &discretization, &tools)).await?;
            print_summary(&request.output, &summary);
            if let Some(path) = report_path {
                let inputs = vec![request.sh_image.clone(), request.mask.clone(), odf_table];
                let report = report::build_report(ConversionKind::MrtrixToFib, inputs, &request.output, summary)?;
                report::write_report(&path, &report)?;
            }
        }
        Commands::Info { file, json } => inspect::print_info(&file, json)?,
        Commands::Batch {
            directory,
            operation,
        } => {
            let failures = batch::process_directory(&directory, operation)?;
            if failures > 0 {
                bail!("{} fib files failed", failures);
            }
        }
    }

    Ok(())
}
