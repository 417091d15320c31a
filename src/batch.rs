use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::{cli::BatchOperation, inspect};

pub fn is_fib_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(".fib") || n.ends_with(".fib.gz"))
}

pub fn find_fib_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_fib_path(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn check_file(path: &Path, operation: BatchOperation) -> Result<String> {
    let summary = inspect::read_fib_summary(path)?;
    match operation {
        BatchOperation::Info => Ok(format!(
            "{:?} | voxels: {} | splits: {} | peak layers: {}",
            summary.dimension.unwrap_or_default(),
            summary.foreground_voxels.unwrap_or_default(),
            summary.odf_splits,
            summary.peak_layers
        )),
        BatchOperation::Validate => match summary.problem {
            None => Ok("valid".to_string()),
            Some(problem) => bail!(problem),
        },
    }
}

/// Runs `operation` on every fib file under `dir`. Returns the number of failures.
pub fn process_directory(dir: &Path, operation: BatchOperation) -> Result<usize> {
    println!("Processing directory: {:?} | Operation: {:?}", dir, operation);

    let files = find_fib_files(dir);
    println!("Found {} fib files.", files.len());

    let failures = files
        .par_iter()
        .filter(|path| match check_file(path, operation) {
            Ok(line) => {
                println!("OK {:?}: {}", path, line);
                false
            }
            Err(e) => {
                eprintln!("Error in {:?}: {:#}", path, e);
                true
            }
        })
        .count();

    Ok(failures)
}
