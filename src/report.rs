//
// report.rs
// Odf-Tools-rs
//
// JSON conversion reports: output checksum, completion time, and the conversion summary.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::models::{ConversionKind, ConversionReport, ConversionSummary};

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn build_report(
    conversion: ConversionKind,
    inputs: Vec<PathBuf>,
    output: &Path,
    summary: ConversionSummary,
) -> Result<ConversionReport> {
    let output_sha256 =
        sha256_file(output).with_context(|| format!("Failed to hash output {:?}", output))?;
    Ok(ConversionReport {
        conversion,
        inputs,
        output: output.to_path_buf(),
        output_sha256,
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        summary,
    })
}

pub fn to_json_string(report: &ConversionReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

pub fn write_report(path: &Path, report: &ConversionReport) -> Result<()> {
    let json = to_json_string(report)?;
    std::fs::write(path, json).context("Failed to write report")?;
    println!("Report saved to {:?}", path);
    Ok(())
}
