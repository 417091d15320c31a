//
// models.rs
// Odf-Tools-rs
//
// Serializable summaries for conversions, fib inspection, and JSON reports.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a finished conversion produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub dimension: [usize; 3],
    pub foreground_voxels: usize,
    /// Hemisphere directions the ODFs were sampled on.
    pub directions: usize,
    pub odf_splits: usize,
    /// Peak layers written; only set for fib output.
    pub fibers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionKind {
    FibToMrtrix,
    MrtrixToFib,
}

/// Written by `--report` after a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub conversion: ConversionKind,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub output_sha256: String,
    pub finished_at: String,
    pub summary: ConversionSummary,
}

/// Structure of a fib file as reported by `info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibSummary {
    pub path: PathBuf,
    pub dimension: Option<[usize; 3]>,
    pub voxel_size: Option<Vec<f64>>,
    pub foreground_voxels: Option<usize>,
    pub vertices: Option<usize>,
    pub faces: Option<usize>,
    pub odf_splits: usize,
    pub odf_columns: usize,
    pub peak_layers: usize,
    pub matrices: Vec<String>,
    /// The ODF splits reassemble cleanly against the `fa0` mask.
    pub consistent: bool,
    pub problem: Option<String>,
}
