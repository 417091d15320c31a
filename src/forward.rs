//
// forward.rs
// Odf-Tools-rs
//
// DSI Studio fib -> MRtrix3 SH: reassembles the split ODF matrices onto the voxel grid and fits SH with amp2sh.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array4, Axis};
use tracing::{debug, info, warn};

use crate::background::{self, StopSignal};
use crate::convention::{Directions, Lps};
use crate::error::{ConvertError, Result};
use crate::grid::{ForegroundMask, Grid};
use crate::matfile::{self, MatFile};
use crate::models::ConversionSummary;
use crate::scratch::ScratchDir;
use crate::split;
use crate::tools::ToolConfig;
use crate::volume;

pub const AMPLITUDES_FILE: &str = "odf_values.nii";
pub const DIRECTIONS_FILE: &str = "ras+directions.txt";

#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub fib: PathBuf,
    /// Image on the fib grid; only its header is used.
    pub reference: PathBuf,
    pub output: PathBuf,
}

/// Foreground ODF samples read out of a fib file, before any rescaling.
#[derive(Debug, Clone)]
pub struct OdfSamples {
    pub mask: ForegroundMask,
    /// Hemisphere directions, LPS+.
    pub directions: Directions<Lps>,
    /// `(foreground voxels x directions)`.
    pub odfs: Array2<f64>,
    pub splits: usize,
}

/// ODF amplitudes on the full grid: `(x, y, z, direction)`.
#[derive(Debug, Clone)]
pub struct OdfVolume {
    pub data: Array4<f32>,
    pub mask: ForegroundMask,
    pub directions: Directions<Lps>,
    pub splits: usize,
}

/// `odf0`, `odf1`, ... in suffix order. Gaps in the numbering are an error.
pub fn odf_split_names(fib: &MatFile) -> Result<Vec<String>> {
    let mut numbered: Vec<(usize, &str)> = fib
        .names()
        .filter_map(|name| {
            let suffix = name.strip_prefix("odf")?;
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            suffix.parse().ok().map(|k| (k, name))
        })
        .collect();
    numbered.sort_unstable();
    for (expected, &(k, _)) in numbered.iter().enumerate() {
        if k != expected {
            return Err(ConvertError::MissingKey {
                key: format!("odf{}", expected),
            });
        }
    }
    Ok(numbered.into_iter().map(|(_, name)| name.to_string()).collect())
}

/// Columns (voxels) of one split whose sum is strictly positive.
pub fn positive_columns(split: &Array2<f64>) -> Array2<f64> {
    let keep: Vec<usize> = split
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.sum() > 0.0)
        .map(|(idx, _)| idx)
        .collect();
    split.select(Axis(1), &keep)
}

/// Subtracts each direction's minimum over voxels so every sample is `>= 0`.
pub fn shift_to_nonnegative(odfs: &mut Array2<f64>) {
    for mut column in odfs.axis_iter_mut(Axis(1)) {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            column.mapv_inplace(|v| v - min);
        }
    }
}

/// Reads the grid, mask, hemisphere and split ODF matrices of a fib file and
/// checks that they agree.
pub fn collect_odf_samples(fib: &MatFile) -> Result<OdfSamples> {
    let grid = Grid::from_dimension(fib.require("dimension")?.values())?;
    let vertices = Directions::<Lps>::from_columns(fib.require("odf_vertices")?.to_array().view())?;
    let directions = vertices.hemisphere();
    if directions.is_empty() {
        return Err(ConvertError::malformed("odf_vertices", "holds no directions"));
    }

    let mask = ForegroundMask::from_flat(grid, fib.require("fa0")?.values())?;
    if mask.is_empty() {
        return Err(ConvertError::malformed("fa0", "has no foreground voxels"));
    }

    let names = odf_split_names(fib)?;
    if names.is_empty() {
        return Err(ConvertError::MissingKey { key: "odf0".to_string() });
    }
    let mut stored_columns = 0;
    let mut chunks = Vec::with_capacity(names.len());
    for name in &names {
        let split = fib.require(name)?;
        stored_columns += split.cols();
        chunks.push(positive_columns(&split.to_array()));
    }
    let kept: usize = chunks.iter().map(|c| c.ncols()).sum();
    if kept < stored_columns {
        warn!(
            dropped = stored_columns - kept,
            "ignoring ODF columns without a positive sum"
        );
    }
    let odfs = split::decode(&chunks, directions.len())?;
    if odfs.nrows() != mask.count() {
        return Err(ConvertError::shape(
            "ODF columns with positive sums vs `fa0` foreground voxels",
            mask.count(),
            odfs.nrows(),
        ));
    }
    debug!(
        dims = ?grid.dims(),
        voxels = mask.count(),
        directions = directions.len(),
        splits = names.len(),
        "collected ODF samples"
    );

    Ok(OdfSamples {
        mask,
        directions,
        odfs,
        splits: names.len(),
    })
}

impl OdfSamples {
    /// Shifts the samples non-negative and scatters each direction onto the grid.
    pub fn into_volume(self) -> Result<OdfVolume> {
        let OdfSamples {
            mask,
            directions,
            mut odfs,
            splits,
        } = self;
        shift_to_nonnegative(&mut odfs);

        let [nx, ny, nz] = mask.grid().dims();
        let mut data = Array4::zeros((nx, ny, nz, directions.len()));
        for (d, column) in odfs.axis_iter(Axis(1)).enumerate() {
            let values: Vec<f32> = column.iter().map(|&v| v as f32).collect();
            let slice = mask.scatter_volume(&values)?;
            data.index_axis_mut(Axis(3), d).assign(&slice);
        }
        Ok(OdfVolume {
            data,
            mask,
            directions,
            splits,
        })
    }
}

pub fn reassemble_odfs(fib: &MatFile) -> Result<OdfVolume> {
    collect_odf_samples(fib)?.into_volume()
}

/// Runs the whole forward conversion. Intermediate files go to `scratch`;
/// `request.output` only appears once amp2sh has succeeded.
pub async fn fib_to_mrtrix(
    request: &ForwardRequest,
    tools: &ToolConfig,
    scratch: &ScratchDir,
) -> Result<ConversionSummary> {
    let amplitudes = scratch.file(AMPLITUDES_FILE);
    let directions = scratch.file(DIRECTIONS_FILE);
    let staged = scratch.staged_output(&request.output)?;

    let summary = {
        let request = request.clone();
        let amplitudes = amplitudes.clone();
        let directions = directions.clone();
        background::run_blocking(move |stop| write_tool_inputs(&request, &amplitudes, &directions, &stop)).await?
    };

    tools.fit_sh(&directions, &amplitudes, &staged).await?;
    scratch.persist(&staged, &request.output)?;
    info!(output = %request.output.display(), "wrote SH image");
    Ok(summary)
}

/// Reads the fib, checks it against the reference grid and writes the
/// amplitude image and direction table amp2sh expects.
fn write_tool_inputs(
    request: &ForwardRequest,
    amplitudes: &Path,
    directions: &Path,
    stop: &StopSignal,
) -> Result<ConversionSummary> {
    info!(fib = %request.fib.display(), "loading fib file");
    let fib = matfile::read_file(&request.fib)?;
    let odf = reassemble_odfs(&fib)?;
    info!(
        voxels = odf.mask.count(),
        directions = odf.directions.len(),
        splits = odf.splits,
        "reassembled ODF volume"
    );

    let reference = volume::read_header(&request.reference)?;
    let grid = odf.mask.grid();
    if volume::spatial_dims(&reference) != grid.dims() {
        return Err(ConvertError::GeometryMismatch(format!(
            "reference image grid {:?} differs from fib dimension {:?}",
            volume::spatial_dims(&reference),
            grid.dims()
        )));
    }

    stop.check()?;
    volume::write_volume(amplitudes, &odf.data, &reference)?;
    odf.directions.convert().write_angle_table(directions)?;

    Ok(ConversionSummary {
        dimension: grid.dims(),
        foreground_voxels: odf.mask.count(),
        directions: odf.directions.len(),
        odf_splits: odf.splits,
        fibers: None,
    })
}
