//
// inspect.rs
// Odf-Tools-rs
//
// Summarizes the structure of a fib file (grid, mask, ODF splits, peak layers) for `info` and `batch`.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use anyhow::{Context, Result};

use crate::forward::{collect_odf_samples, odf_split_names};
use crate::grid::{ForegroundMask, Grid};
use crate::matfile::{self, MatFile};
use crate::models::FibSummary;

fn is_peak_layer(name: &str) -> bool {
    name.strip_prefix("fa")
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Describes whatever is present; structural problems land in `problem`
/// instead of failing.
pub fn summarize_fib(path: &Path, fib: &MatFile) -> FibSummary {
    let grid = fib
        .get("dimension")
        .and_then(|m| Grid::from_dimension(m.values()).ok());
    let foreground_voxels = match (grid, fib.get("fa0")) {
        (Some(grid), Some(fa0)) => ForegroundMask::from_flat(grid, fa0.values()).ok().map(|m| m.count()),
        _ => None,
    };
    let split_names = odf_split_names(fib).unwrap_or_default();
    let odf_columns = split_names
        .iter()
        .filter_map(|name| fib.get(name))
        .map(|m| m.cols())
        .sum();
    let checked = collect_odf_samples(fib);

    FibSummary {
        path: path.to_path_buf(),
        dimension: grid.map(|g| g.dims()),
        voxel_size: fib.get("voxel_size").map(|m| m.values().to_vec()),
        foreground_voxels,
        vertices: fib.get("odf_vertices").map(|m| m.cols()),
        faces: fib.get("odf_faces").map(|m| m.cols()),
        odf_splits: split_names.len(),
        odf_columns,
        peak_layers: fib.names().filter(|n| is_peak_layer(n)).count(),
        matrices: fib.names().map(str::to_string).collect(),
        consistent: checked.is_ok(),
        problem: checked.err().map(|e| e.to_string()),
    }
}

pub fn read_fib_summary(path: &Path) -> Result<FibSummary> {
    let fib = matfile::read_file(path).with_context(|| format!("Failed to read fib file {:?}", path))?;
    Ok(summarize_fib(path, &fib))
}

fn or_na<T: std::fmt::Debug>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "N/A".to_string(), |v| format!("{:?}", v))
}

pub fn print_info(path: &Path, json: bool) -> Result<()> {
    let summary = read_fib_summary(path)?;
    if json {
        let text = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
        println!("{}", text);
        return Ok(());
    }

    println!("{}", "=".repeat(80));
    println!("Fib File Information: {}", path.display());
    println!("{}", "=".repeat(80));

    println!("GRID");
    println!("  Dimension:  {}", or_na(&summary.dimension));
    println!("  Voxel size: {}", or_na(&summary.voxel_size));
    println!("  Foreground: {}", or_na(&summary.foreground_voxels));

    println!("\nODF");
    println!("  Vertices:   {}", or_na(&summary.vertices));
    println!("  Faces:      {}", or_na(&summary.faces));
    println!(
        "  Splits:     {} ({} voxel columns)",
        summary.odf_splits, summary.odf_columns
    );
    println!("  Peak layers: {}", summary.peak_layers);

    println!("\nCHECK");
    match &summary.problem {
        None => println!("  ODF splits match the fa0 mask"),
        Some(problem) => println!("  Inconsistent: {}", problem),
    }
    Ok(())
}
