//
// grid.rs
// Odf-Tools-rs
//
// Voxel grid bookkeeping: column-major linearization and foreground-mask scatter/gather.
//
// Thales Matheus Mendonça Santos - November 2025

use ndarray::{s, Array2, Array3, ArrayView3, ArrayView4};

use crate::error::{ConvertError, Result};

/// Spatial extent of a volume. Flat indices are column-major (x fastest),
/// matching both the fib format and NIfTI on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    dims: [usize; 3],
}

impl Grid {
    pub fn new(dims: [usize; 3]) -> Self {
        Self { dims }
    }

    /// Parses the fib `dimension` entry: exactly three positive integers.
    pub fn from_dimension(values: &[f64]) -> Result<Self> {
        if values.len() != 3 {
            return Err(ConvertError::shape("`dimension` entries", 3, values.len()));
        }
        let mut dims = [0usize; 3];
        for (slot, &value) in dims.iter_mut().zip(values) {
            if value < 1.0 || value.fract() != 0.0 {
                return Err(ConvertError::malformed(
                    "dimension",
                    format!("{} is not a positive integer", value),
                ));
            }
            *slot = value as usize;
        }
        dims.iter()
            .try_fold(1usize, |total, &d| total.checked_mul(d))
            .ok_or_else(|| {
                ConvertError::malformed("dimension", format!("{:?} overflows the voxel count", values))
            })?;
        Ok(Self { dims })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn ravel(&self, [i, j, k]: [usize; 3]) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    pub fn unravel(&self, flat: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dims;
        [flat % nx, (flat / nx) % ny, flat / (nx * ny)]
    }
}

/// Voxels that carry ODF data, in column-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    grid: Grid,
    positions: Vec<usize>,
}

impl ForegroundMask {
    /// Builds the mask from a flat column-major array (e.g. `fa0`); a voxel is
    /// foreground when its value is strictly positive.
    pub fn from_flat(grid: Grid, values: &[f64]) -> Result<Self> {
        if values.len() != grid.voxel_count() {
            return Err(ConvertError::shape(
                "mask length vs grid voxel count",
                grid.voxel_count(),
                values.len(),
            ));
        }
        let positions = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(idx, _)| idx)
            .collect();
        Ok(Self { grid, positions })
    }

    pub fn from_volume(volume: ArrayView3<'_, f32>) -> Self {
        let (nx, ny, nz) = volume.dim();
        let grid = Grid::new([nx, ny, nz]);
        // The transposed view iterates with x fastest.
        let positions = volume
            .t()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(idx, _)| idx)
            .collect();
        Self { grid, positions }
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Places one value per foreground voxel into a zeroed full-grid array.
    pub fn scatter<T: Copy + Default>(&self, values: &[T]) -> Result<Vec<T>> {
        self.check_count(values.len())?;
        let mut full = vec![T::default(); self.grid.voxel_count()];
        for (&pos, &value) in self.positions.iter().zip(values) {
            full[pos] = value;
        }
        Ok(full)
    }

    pub fn gather<T: Copy>(&self, full: &[T]) -> Result<Vec<T>> {
        if full.len() != self.grid.voxel_count() {
            return Err(ConvertError::shape(
                "full-grid array length",
                self.grid.voxel_count(),
                full.len(),
            ));
        }
        Ok(self.positions.iter().map(|&pos| full[pos]).collect())
    }

    /// Scatters into a 3D volume, reshaping the flat array column-major.
    pub fn scatter_volume(&self, values: &[f32]) -> Result<Array3<f32>> {
        let flat = self.scatter(values)?;
        let grid = self.grid;
        Ok(Array3::from_shape_fn(
            (grid.dims[0], grid.dims[1], grid.dims[2]),
            |(i, j, k)| flat[grid.ravel([i, j, k])],
        ))
    }

    /// Pulls the last-axis samples of every foreground voxel into a
    /// `(voxels x samples)` matrix.
    pub fn gather_rows(&self, volume: ArrayView4<'_, f32>) -> Result<Array2<f64>> {
        let shape = volume.shape();
        if shape[..3] != self.grid.dims[..] {
            return Err(ConvertError::GeometryMismatch(format!(
                "volume grid {:?} does not match mask grid {:?}",
                &shape[..3],
                self.grid.dims
            )));
        }
        let samples = shape[3];
        let mut rows = Array2::zeros((self.count(), samples));
        for (mut row, &pos) in rows.outer_iter_mut().zip(&self.positions) {
            let [i, j, k] = self.grid.unravel(pos);
            row.assign(&volume.slice(s![i, j, k, ..]).mapv(f64::from));
        }
        Ok(rows)
    }

    fn check_count(&self, found: usize) -> Result<()> {
        if found != self.count() {
            return Err(ConvertError::shape(
                "values vs foreground voxels",
                self.count(),
                found,
            ));
        }
        Ok(())
    }
}
