//
// convention.rs
// Odf-Tools-rs
//
// Direction arrays tagged with their coordinate convention (LPS+ for DSI Studio, RAS+ for MRtrix3).
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt::Write as _;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ConvertError, Result};

/// Handedness of a direction array. Implemented only by the two marker types.
pub trait Convention {
    const NAME: &'static str;
    type Opposite: Convention;
}

/// Left-Posterior-Superior, used by DSI Studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lps {}

/// Right-Anterior-Superior, used by MRtrix3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ras {}

impl Convention for Lps {
    const NAME: &'static str = "LPS+";
    type Opposite = Ras;
}

impl Convention for Ras {
    const NAME: &'static str = "RAS+";
    type Opposite = Lps;
}

/// `n x 3` unit vectors in convention `C`.
#[derive(Debug, Clone, PartialEq)]
pub struct Directions<C: Convention> {
    xyz: Array2<f64>,
    convention: PhantomData<C>,
}

impl<C: Convention> Directions<C> {
    pub fn new(xyz: Array2<f64>) -> Result<Self> {
        if xyz.ncols() != 3 {
            return Err(ConvertError::shape(
                format!("{} direction columns", C::NAME),
                3,
                xyz.ncols(),
            ));
        }
        Ok(Self {
            xyz,
            convention: PhantomData,
        })
    }

    /// Builds from a `3 x n` matrix, the layout fib files and geometry tables use.
    pub fn from_columns(columns: ArrayView2<'_, f64>) -> Result<Self> {
        if columns.nrows() != 3 {
            return Err(ConvertError::shape(
                format!("{} direction rows", C::NAME),
                3,
                columns.nrows(),
            ));
        }
        Self::new(columns.t().to_owned())
    }

    pub fn len(&self) -> usize {
        self.xyz.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.xyz.nrows() == 0
    }

    pub fn as_array(&self) -> ArrayView2<'_, f64> {
        self.xyz.view()
    }

    pub fn vector(&self, index: usize) -> ArrayView1<'_, f64> {
        self.xyz.row(index)
    }

    /// The independent half of an antipodally symmetric set.
    pub fn hemisphere(&self) -> Directions<C> {
        let half = self.len() / 2;
        Directions {
            xyz: self.xyz.slice(s![..half, ..]).to_owned(),
            convention: PhantomData,
        }
    }

    /// Flips x and y, the only difference between LPS+ and RAS+.
    pub fn convert(&self) -> Directions<C::Opposite> {
        let mut xyz = self.xyz.clone();
        xyz.slice_mut(s![.., 0..2]).mapv_inplace(|v| -v);
        Directions {
            xyz,
            convention: PhantomData,
        }
    }

    /// `(phi, theta)` per direction: azimuth from +x, polar angle from +z.
    pub fn spherical_angles(&self) -> Vec<(f64, f64)> {
        self.xyz
            .axis_iter(Axis(0))
            .map(|v| {
                let (x, y, z) = (v[0], v[1], v[2]);
                let r = (x * x + y * y + z * z).sqrt();
                let theta = if r > 0.0 { (z / r).clamp(-1.0, 1.0).acos() } else { 0.0 };
                (y.atan2(x), theta)
            })
            .collect()
    }

    /// Plain-text `phi theta` table consumed by `amp2sh -directions` and `sh2amp`.
    pub fn angle_table(&self) -> String {
        let mut table = String::new();
        for (phi, theta) in self.spherical_angles() {
            let _ = writeln!(table, "{:.18e} {:.18e}", phi, theta);
        }
        table
    }

    pub fn write_angle_table(&self, path: &Path) -> Result<()> {
        fs::write(path, self.angle_table())?;
        Ok(())
    }
}
