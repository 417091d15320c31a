//
// scratch.rs
// Odf-Tools-rs
//
// Per-run scratch directory for intermediate files, placed next to the final output and removed on drop.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::Result;

const STAGING_DIR: &str = "output";

pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Creates a hidden scratch directory in the same folder as `output`, so the
    /// finished file can be renamed into place.
    pub fn near(output: &Path) -> Result<Self> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::in_dir(parent)
    }

    pub fn in_dir(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(".odf-tools-")
            .tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Where a tool should write `output` before it is moved into place. The
    /// file name is kept so tools that infer the format from the extension agree;
    /// it lives in its own subdirectory so it never shadows an intermediate file.
    pub fn staged_output(&self, output: &Path) -> Result<PathBuf> {
        let name = output
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("output path {:?} has no file name", output),
                )
            })?;
        let staging = self.dir.path().join(STAGING_DIR);
        fs::create_dir_all(&staging)?;
        Ok(staging.join(name))
    }

    /// Moves a finished file to its destination, copying when a rename is not possible.
    pub fn persist(&self, staged: &Path, destination: &Path) -> Result<()> {
        if fs::rename(staged, destination).is_err() {
            fs::copy(staged, destination)?;
            fs::remove_file(staged)?;
        }
        debug!(destination = %destination.display(), "persisted output");
        Ok(())
    }
}

fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        .collect()
}
