//
// peaks.rs
// Odf-Tools-rs
//
// Peak extraction from ODFs sampled on a hemisphere mesh, fanned out over voxels with rayon.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use tracing::info;

use crate::background::StopSignal;
use crate::convention::{Directions, Lps};
use crate::error::{ConvertError, Result};
use crate::odf_table::OdfGeometry;

pub const DEFAULT_FIBERS: usize = 3;
pub const DEFAULT_RELATIVE_PEAK_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MIN_SEPARATION_ANGLE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Hemisphere direction index.
    pub index: usize,
    pub value: f64,
}

/// Finds the maxima of a spherical function sampled once per hemisphere direction.
pub trait PeakFinder: Sync {
    /// Number of samples expected per voxel.
    fn directions(&self) -> usize;

    /// Peaks ordered by descending value.
    fn find_peaks(&self, samples: ArrayView1<'_, f64>) -> Vec<Peak>;
}

/// Mesh local maxima, filtered by a threshold relative to the strongest peak
/// and by a minimum axial separation angle.
#[derive(Debug, Clone)]
pub struct LocalMaximaPeakFinder {
    vertices: Directions<Lps>,
    edges: Vec<(usize, usize)>,
    relative_peak_threshold: f64,
    min_separation_angle: f64,
}

impl LocalMaximaPeakFinder {
    pub fn new(geometry: &OdfGeometry) -> Self {
        Self::from_mesh(geometry.hemisphere(), geometry.hemisphere_edges())
    }

    pub fn from_mesh(vertices: Directions<Lps>, edges: Vec<(usize, usize)>) -> Self {
        Self {
            vertices,
            edges,
            relative_peak_threshold: DEFAULT_RELATIVE_PEAK_THRESHOLD,
            min_separation_angle: DEFAULT_MIN_SEPARATION_ANGLE,
        }
    }

    pub fn with_relative_peak_threshold(mut self, threshold: f64) -> Self {
        self.relative_peak_threshold = threshold;
        self
    }

    /// Angle in degrees.
    pub fn with_min_separation_angle(mut self, angle: f64) -> Self {
        self.min_separation_angle = angle;
        self
    }

    fn local_maxima(&self, samples: ArrayView1<'_, f64>) -> Vec<Peak> {
        let mut is_max: Vec<bool> = samples.iter().map(|v| !v.is_nan()).collect();
        for &(a, b) in &self.edges {
            let (va, vb) = (samples[a], samples[b]);
            if va < vb {
                is_max[a] = false;
            } else if va > vb {
                is_max[b] = false;
            }
        }
        let mut maxima: Vec<Peak> = is_max
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(index, _)| Peak {
                index,
                value: samples[index],
            })
            .collect();
        maxima.sort_by(|a, b| b.value.total_cmp(&a.value));
        maxima
    }
}

impl PeakFinder for LocalMaximaPeakFinder {
    fn directions(&self) -> usize {
        self.vertices.len()
    }

    fn find_peaks(&self, samples: ArrayView1<'_, f64>) -> Vec<Peak> {
        let maxima = self.local_maxima(samples);
        if maxima.is_empty() || maxima[0].value < 0.0 {
            return Vec::new();
        }
        if maxima.len() == 1 {
            return maxima;
        }

        // Relative threshold measured above the (non-negative) floor of the function.
        let floor = samples.iter().copied().fold(f64::INFINITY, f64::min).max(0.0);
        let cutoff = self.relative_peak_threshold * (maxima[0].value - floor);
        let cos_limit = self.min_separation_angle.to_radians().cos();

        let mut kept: Vec<Peak> = Vec::with_capacity(maxima.len());
        for peak in maxima.into_iter().take_while(|p| p.value - floor >= cutoff) {
            let direction = self.vertices.vector(peak.index);
            let distinct = kept.iter().all(|other| {
                let dot = direction.dot(&self.vertices.vector(other.index));
                dot.abs() <= cos_limit
            });
            if distinct {
                kept.push(peak);
            }
        }
        kept
    }
}

/// Top peaks per voxel, zero padded: `(voxels x fibers)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakTable {
    values: Array2<f32>,
    indices: Array2<i16>,
}

impl PeakTable {
    pub fn voxels(&self) -> usize {
        self.values.nrows()
    }

    pub fn fibers(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn indices(&self) -> &Array2<i16> {
        &self.indices
    }

    /// Peak amplitudes of rank `fiber` for every voxel.
    pub fn values_column(&self, fiber: usize) -> Vec<f32> {
        self.values.column(fiber).to_vec()
    }

    pub fn indices_column(&self, fiber: usize) -> Vec<i16> {
        self.indices.column(fiber).to_vec()
    }
}

/// Runs `finder` on each row of `(voxels x directions)` samples, keeping the
/// first `fibers` peaks per voxel.
pub fn extract_peaks<F>(odfs: ArrayView2<'_, f64>, finder: &F, fibers: usize) -> Result<PeakTable>
where
    F: PeakFinder + ?Sized,
{
    extract_peaks_until(odfs, finder, fibers, &StopSignal::new())
}

/// Like [`extract_peaks`], but returns `Cancelled` as soon as `stop` is raised;
/// voxels already in flight finish first.
pub fn extract_peaks_until<F>(
    odfs: ArrayView2<'_, f64>,
    finder: &F,
    fibers: usize,
    stop: &StopSignal,
) -> Result<PeakTable>
where
    F: PeakFinder + ?Sized,
{
    if odfs.ncols() != finder.directions() {
        return Err(ConvertError::shape(
            "ODF samples per voxel vs peak finder directions",
            finder.directions(),
            odfs.ncols(),
        ));
    }
    let voxels = odfs.nrows();
    info!(voxels, fibers, "extracting ODF peaks");

    let found: Vec<Vec<Peak>> = (0..voxels)
        .into_par_iter()
        .map(|v| (!stop.is_stopped()).then(|| finder.find_peaks(odfs.row(v))))
        .collect::<Option<_>>()
        .ok_or(ConvertError::Cancelled)?;

    let mut values = Array2::zeros((voxels, fibers));
    let mut indices = Array2::zeros((voxels, fibers));
    for (v, peaks) in found.iter().enumerate() {
        for (rank, peak) in peaks.iter().take(fibers).enumerate() {
            values[[v, rank]] = peak.value as f32;
            indices[[v, rank]] = i16::try_from(peak.index).map_err(|_| {
                ConvertError::malformed("index", format!("peak index {} exceeds int16", peak.index))
            })?;
        }
    }
    Ok(PeakTable { values, indices })
}
