//
// reverse.rs
// Odf-Tools-rs
//
// MRtrix3 SH -> DSI Studio fib: samples amplitudes with sh2amp, extracts peaks, and writes the fib matrices.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use tracing::info;

use crate::background::{self, StopSignal};
use crate::error::{ConvertError, Result};
use crate::grid::ForegroundMask;
use crate::matfile::{self, MatFile, MatMatrix, Precision};
use crate::models::ConversionSummary;
use crate::odf_table::OdfGeometry;
use crate::peaks::{extract_peaks_until, PeakFinder, PeakTable};
use crate::scratch::ScratchDir;
use crate::split::{self, ODF_COLS};
use crate::tools::ToolConfig;
use crate::volume::{self, Volume};

pub const AMPLITUDES_FILE: &str = "amplitudes.nii.gz";
pub const DIRECTIONS_FILE: &str = "directions.txt";

#[derive(Debug, Clone)]
pub struct ReverseRequest {
    pub sh_image: PathBuf,
    pub mask: PathBuf,
    pub output: PathBuf,
    pub fibers: usize,
}

/// Foreground amplitudes pulled out of an sh2amp volume.
#[derive(Debug, Clone)]
pub struct MaskedAmplitudes {
    pub mask: ForegroundMask,
    /// `(foreground voxels x directions)`.
    pub odfs: Array2<f64>,
    pub voxel_size: [f64; 3],
}

/// Checks that `amplitudes` and `mask` share orientation and grid, that the
/// amplitudes carry one sample per hemisphere direction, and that the mask
/// selects at least one voxel.
pub fn mask_amplitudes(amplitudes: Volume, mask: Volume, directions: usize) -> Result<MaskedAmplitudes> {
    if !volume::affines_close(&mask.affine(), &amplitudes.affine()) {
        return Err(ConvertError::GeometryMismatch(
            "differing orientation between mask and amplitudes".to_string(),
        ));
    }
    let amplitude_shape = amplitudes.shape().to_vec();
    if amplitude_shape.len() < 3 || mask.shape() != &amplitude_shape[..3] {
        return Err(ConvertError::GeometryMismatch(format!(
            "differing grid between mask {:?} and amplitudes {:?}",
            mask.shape(),
            amplitude_shape
        )));
    }

    let voxel_size = amplitudes.voxel_size();
    let samples = amplitudes.into_4d("amplitude image")?;
    if samples.shape()[3] != directions {
        return Err(ConvertError::shape(
            "amplitude samples per voxel vs hemisphere directions",
            directions,
            samples.shape()[3],
        ));
    }
    let mask = ForegroundMask::from_volume(mask.into_3d("mask image")?.view());
    if mask.is_empty() {
        return Err(ConvertError::EmptyMask);
    }
    let odfs = mask.gather_rows(samples.view())?;
    Ok(MaskedAmplitudes {
        mask,
        odfs,
        voxel_size,
    })
}

/// Assembles the fib matrices in the order DSI Studio writes them.
pub fn build_fib(
    mask: &ForegroundMask,
    voxel_size: [f64; 3],
    odfs: ArrayView2<'_, f64>,
    peaks: &PeakTable,
    geometry: &OdfGeometry,
) -> Result<MatFile> {
    let mut fib = MatFile::new();
    let dims = mask.grid().dims();
    fib.insert(
        "dimension",
        MatMatrix::row_vector(dims.iter().map(|&d| d as f64), Precision::I32),
    );
    fib.insert("voxel_size", MatMatrix::row_vector(voxel_size, Precision::F32));

    for fiber in 0..peaks.fibers() {
        let values = mask.scatter(&peaks.values_column(fiber))?;
        fib.insert(
            format!("fa{}", fiber),
            MatMatrix::row_vector(values.into_iter().map(f64::from), Precision::F32),
        );
        let indices = mask.scatter(&peaks.indices_column(fiber))?;
        fib.insert(
            format!("index{}", fiber),
            MatMatrix::row_vector(indices.into_iter().map(f64::from), Precision::I16),
        );
    }

    for (k, chunk) in split::encode(odfs, ODF_COLS).iter().enumerate() {
        fib.insert(format!("odf{}", k), MatMatrix::from_array(chunk.view(), Precision::F32));
    }
    fib.insert("odf_vertices", geometry.vertices_matrix().clone());
    fib.insert("odf_faces", geometry.faces_matrix().clone());
    fib.insert("z0", MatMatrix::row_vector([1.0], Precision::F64));
    Ok(fib)
}

/// Everything after sampling: geometry checks, peaks and fib assembly.
/// Peak extraction stops early once `stop` is raised.
pub fn amplitudes_to_fib<F>(
    amplitudes: Volume,
    mask: Volume,
    geometry: &OdfGeometry,
    finder: &F,
    fibers: usize,
    stop: &StopSignal,
) -> Result<(MatFile, ConversionSummary)>
where
    F: PeakFinder + ?Sized,
{
    let masked = mask_amplitudes(amplitudes, mask, geometry.hemisphere_count())?;
    let peaks = extract_peaks_until(masked.odfs.view(), finder, fibers, stop)?;
    let fib = build_fib(
        &masked.mask,
        masked.voxel_size,
        masked.odfs.view(),
        &peaks,
        geometry,
    )?;
    let summary = ConversionSummary {
        dimension: masked.mask.grid().dims(),
        foreground_voxels: masked.mask.count(),
        directions: geometry.hemisphere_count(),
        odf_splits: split::chunk_count(masked.mask.count(), ODF_COLS),
        fibers: Some(fibers),
    };
    Ok((fib, summary))
}

/// Runs the whole reverse conversion. The fib file is staged in `scratch` and
/// only moved to `request.output` once every check has passed; dropping the
/// future stops peak extraction and leaves no output behind.
pub async fn mrtrix_to_fib<F>(
    request: &ReverseRequest,
    geometry: &OdfGeometry,
    finder: Arc<F>,
    tools: &ToolConfig,
    scratch: &ScratchDir,
) -> Result<ConversionSummary>
where
    F: PeakFinder + Send + ?Sized + 'static,
{
    let directions = scratch.file(DIRECTIONS_FILE);
    geometry.hemisphere().convert().write_angle_table(&directions)?;

    let amplitudes_path = scratch.file(AMPLITUDES_FILE);
    tools
        .sample_amplitudes(&request.sh_image, &directions, &amplitudes_path)
        .await?;

    let staged = scratch.staged_output(&request.output)?;
    let mask_path = request.mask.clone();
    let fib_path = staged.clone();
    let geometry = geometry.clone();
    let fibers = request.fibers;
    let summary = background::run_blocking(move |stop| {
        info!(mask = %mask_path.display(), "loading amplitudes and mask");
        let amplitudes = Volume::load(&amplitudes_path)?;
        let mask = Volume::load(&mask_path)?;
        let (fib, summary) = amplitudes_to_fib(amplitudes, mask, &geometry, finder.as_ref(), fibers, &stop)?;
        stop.check()?;
        matfile::write_file(&fib_path, &fib)?;
        Ok(summary)
    })
    .await?;

    scratch.persist(&staged, &request.output)?;
    info!(
        output = %request.output.display(),
        voxels = summary.foreground_voxels,
        splits = summary.odf_splits,
        "wrote fib file"
    );
    Ok(summary)
}
