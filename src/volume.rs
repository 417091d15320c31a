//
// volume.rs
// Odf-Tools-rs
//
// NIfTI helpers on top of the nifti crate: loading as f32 arrays, affine recovery, and header-preserving writes.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use nalgebra::Matrix4;
use ndarray::{Array, Array3, Array4, ArrayD, Dimension, Ix3, Ix4, RemoveAxis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{ConvertError, Result};

/// `numpy.allclose` defaults.
const AFFINE_RTOL: f64 = 1e-5;
const AFFINE_ATOL: f64 = 1e-8;

/// A NIfTI image held in memory with intensities converted to `f32`.
#[derive(Debug, Clone)]
pub struct Volume {
    header: NiftiHeader,
    data: ArrayD<f32>,
}

impl Volume {
    pub fn load(path: &Path) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path)?;
        let header = obj.header().clone();
        let data = obj.into_volume().into_ndarray::<f32>()?;
        Ok(Self { header, data })
    }

    pub fn from_parts(header: NiftiHeader, data: ArrayD<f32>) -> Self {
        Self { header, data }
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn affine(&self) -> Matrix4<f64> {
        header_affine(&self.header)
    }

    pub fn voxel_size(&self) -> [f64; 3] {
        voxel_size(&self.header)
    }

    pub fn into_3d(self, what: &str) -> Result<Array3<f32>> {
        let ndim = self.data.ndim();
        self.data
            .into_dimensionality::<Ix3>()
            .map_err(|_| ConvertError::shape(format!("{} dimensions", what), 3, ndim))
    }

    pub fn into_4d(self, what: &str) -> Result<Array4<f32>> {
        let ndim = self.data.ndim();
        self.data
            .into_dimensionality::<Ix4>()
            .map_err(|_| ConvertError::shape(format!("{} dimensions", what), 4, ndim))
    }
}

/// Reads only the header, e.g. for a reference image whose voxels are unused.
pub fn read_header(path: &Path) -> Result<NiftiHeader> {
    Ok(NiftiHeader::from_file(path)?)
}

/// Spatial dimensions recorded in a header (`dim[1..=3]`).
pub fn spatial_dims(header: &NiftiHeader) -> [usize; 3] {
    [
        usize::from(header.dim[1]),
        usize::from(header.dim[2]),
        usize::from(header.dim[3]),
    ]
}

pub fn voxel_size(header: &NiftiHeader) -> [f64; 3] {
    [
        f64::from(header.pixdim[1]),
        f64::from(header.pixdim[2]),
        f64::from(header.pixdim[3]),
    ]
}

/// Voxel-to-world transform: sform when set, otherwise qform, otherwise a
/// plain scaling by the voxel size.
pub fn header_affine(header: &NiftiHeader) -> Matrix4<f64> {
    let [dx, dy, dz] = voxel_size(header);
    if header.sform_code > 0 {
        let (x, y, z) = (header.srow_x, header.srow_y, header.srow_z);
        let r = |row: [f32; 4], col: usize| f64::from(row[col]);
        Matrix4::new(
            r(x, 0), r(x, 1), r(x, 2), r(x, 3),
            r(y, 0), r(y, 1), r(y, 2), r(y, 3),
            r(z, 0), r(z, 1), r(z, 2), r(z, 3),
            0.0, 0.0, 0.0, 1.0,
        )
    } else if header.qform_code > 0 {
        let b = f64::from(header.quatern_b);
        let c = f64::from(header.quatern_c);
        let d = f64::from(header.quatern_d);
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;
        Matrix4::new(
            (a * a + b * b - c * c - d * d) * dx,
            2.0 * (b * c - a * d) * dy,
            2.0 * (b * d + a * c) * dz,
            f64::from(header.quatern_x),
            2.0 * (b * c + a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            2.0 * (c * d - a * b) * dz,
            f64::from(header.quatern_y),
            2.0 * (b * d - a * c) * dx,
            2.0 * (c * d + a * b) * dy,
            (a * a + d * d - b * b - c * c) * dz,
            f64::from(header.quatern_z),
            0.0,
            0.0,
            0.0,
            1.0,
        )
    } else {
        Matrix4::new(
            dx, 0.0, 0.0, 0.0,
            0.0, dy, 0.0, 0.0,
            0.0, 0.0, dz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

/// Element-wise `|a - b| <= atol + rtol * |b|`.
pub fn affines_close(a: &Matrix4<f64>, b: &Matrix4<f64>) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| (x - y).abs() <= AFFINE_ATOL + AFFINE_RTOL * y.abs())
}

/// Writes `data` as `f32` with every non-shape field taken from `reference`.
pub fn write_volume<D>(path: &Path, data: &Array<f32, D>, reference: &NiftiHeader) -> Result<()>
where
    D: Dimension + RemoveAxis,
{
    let mut header = reference.clone();
    // The writer would otherwise rescale the samples by the reference intensity mapping.
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(data)?;
    Ok(())
}
