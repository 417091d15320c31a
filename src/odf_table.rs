//
// odf_table.rs
// Odf-Tools-rs
//
// Fixed ODF sampling geometry (vertices and faces) looked up by discretization name, e.g. "odf8".
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;
use std::path::Path;

use ndarray::Array2;
use tracing::debug;

use crate::convention::{Directions, Lps};
use crate::error::{ConvertError, Result};
use crate::matfile::{self, MatFile, MatMatrix};

pub const DEFAULT_DISCRETIZATION: &str = "odf8";
pub const DEFAULT_TABLE_FILE: &str = "odfs.mat";

/// Tolerance for the antipodal symmetry check on load.
const SYMMETRY_TOLERANCE: f64 = 1e-4;

/// One discretized sphere. Vertices are LPS+; the second half negates the first.
#[derive(Debug, Clone)]
pub struct OdfGeometry {
    name: String,
    vertices: Directions<Lps>,
    faces: Array2<usize>,
    vertices_matrix: MatMatrix,
    faces_matrix: MatMatrix,
}

impl OdfGeometry {
    /// Loads `<name>_vertices` and `<name>_faces` from a geometry table file.
    pub fn load(table: &Path, name: &str) -> Result<Self> {
        let mat = matfile::read_file(table)?;
        Self::from_table(&mat, name)
    }

    pub fn from_table(table: &MatFile, name: &str) -> Result<Self> {
        let vertices_key = format!("{}_vertices", name);
        let faces_key = format!("{}_faces", name);
        let (vertices_matrix, faces_matrix) = match (table.get(&vertices_key), table.get(&faces_key)) {
            (Some(v), Some(f)) => (v.clone(), f.clone()),
            _ => {
                return Err(ConvertError::UnknownDiscretization {
                    name: name.to_string(),
                })
            }
        };
        let geometry = Self::from_matrices(name, vertices_matrix, faces_matrix)?;
        debug!(
            name,
            vertices = geometry.vertex_count(),
            faces = geometry.faces.nrows(),
            "loaded ODF geometry"
        );
        Ok(geometry)
    }

    /// Validates a `3 x N` vertex matrix and a `3 x F` face matrix.
    pub fn from_matrices(name: &str, vertices_matrix: MatMatrix, faces_matrix: MatMatrix) -> Result<Self> {
        let vertices = Directions::<Lps>::from_columns(vertices_matrix.to_array().view())?;
        let count = vertices.len();
        if count == 0 || count % 2 != 0 {
            return Err(ConvertError::malformed(
                format!("{}_vertices", name),
                format!("needs an even, non-zero vertex count, found {}", count),
            ));
        }
        let half = count / 2;
        let xyz = vertices.as_array();
        for i in 0..half {
            let mirrored = (0..3).all(|c| (xyz[[i, c]] + xyz[[i + half, c]]).abs() <= SYMMETRY_TOLERANCE);
            if !mirrored {
                return Err(ConvertError::malformed(
                    format!("{}_vertices", name),
                    format!("vertex {} is not the negation of vertex {}", i + half, i),
                ));
            }
        }

        if faces_matrix.rows() != 3 {
            return Err(ConvertError::shape(
                format!("{}_faces rows", name),
                3,
                faces_matrix.rows(),
            ));
        }
        let raw_faces = faces_matrix.to_array();
        let mut faces = Array2::zeros((raw_faces.ncols(), 3));
        for ((f, c), &value) in raw_faces.t().indexed_iter() {
            if value < 0.0 || value.fract() != 0.0 || value as usize >= count {
                return Err(ConvertError::malformed(
                    format!("{}_faces", name),
                    format!("face {} refers to vertex {}", f, value),
                ));
            }
            faces[[f, c]] = value as usize;
        }

        Ok(Self {
            name: name.to_string(),
            vertices,
            faces,
            vertices_matrix,
            faces_matrix,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn hemisphere_count(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn vertices(&self) -> &Directions<Lps> {
        &self.vertices
    }

    /// `F x 3` vertex indices into the full sphere.
    pub fn faces(&self) -> &Array2<usize> {
        &self.faces
    }

    /// The independent half of the sphere, the directions ODFs are sampled on.
    pub fn hemisphere(&self) -> Directions<Lps> {
        self.vertices.hemisphere()
    }

    /// Neighbouring hemisphere vertex pairs. Faces touch both halves, so each
    /// vertex is folded onto its hemisphere representative first.
    pub fn hemisphere_edges(&self) -> Vec<(usize, usize)> {
        let half = self.hemisphere_count();
        let mut edges = BTreeSet::new();
        for face in self.faces.outer_iter() {
            for (a, b) in [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])] {
                let (a, b) = (a % half, b % half);
                if a != b {
                    edges.insert((a.min(b), a.max(b)));
                }
            }
        }
        edges.into_iter().collect()
    }

    /// Matrices as stored in the table, written back verbatim into fib files.
    pub fn vertices_matrix(&self) -> &MatMatrix {
        &self.vertices_matrix
    }

    pub fn faces_matrix(&self) -> &MatMatrix {
        &self.faces_matrix
    }
}
