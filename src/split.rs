//
// split.rs
// Odf-Tools-rs
//
// Codec for the fib "odfN" layout: a dense (voxels x directions) matrix stored as
// transposed chunks of at most ODF_COLS voxels.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

use crate::error::{ConvertError, Result};

/// Maximum number of voxel columns per `odfN` matrix.
pub const ODF_COLS: usize = 20000;

/// Splits `(voxels x directions)` into `(directions x <=cap)` chunks, in voxel
/// order. Zero voxels produce zero chunks.
pub fn encode(odfs: ArrayView2<'_, f64>, cap: usize) -> Vec<Array2<f64>> {
    let cap = cap.max(1);
    let voxels = odfs.nrows();
    (0..voxels)
        .step_by(cap)
        .map(|start| {
            let end = (start + cap).min(voxels);
            odfs.slice(s![start..end, ..]).t().to_owned()
        })
        .collect()
}

/// Concatenates `(directions x n_i)` chunks back into `(voxels x directions)`.
pub fn decode(chunks: &[Array2<f64>], directions: usize) -> Result<Array2<f64>> {
    for (idx, chunk) in chunks.iter().enumerate() {
        if chunk.nrows() != directions {
            return Err(ConvertError::malformed(
                format!("odf{}", idx),
                format!("has {} rows, expected {} directions", chunk.nrows(), directions),
            ));
        }
    }
    if chunks.is_empty() {
        return Ok(Array2::zeros((0, directions)));
    }
    let views: Vec<_> = chunks.iter().map(|chunk| chunk.t()).collect();
    concatenate(Axis(0), &views).map_err(|e| ConvertError::malformed("odf", e.to_string()))
}

/// Number of chunks `encode` produces for `voxels` voxels.
pub fn chunk_count(voxels: usize, cap: usize) -> usize {
    let cap = cap.max(1);
    (voxels + cap - 1) / cap
}
