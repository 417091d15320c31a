//
// lib.rs
// Odf-Tools-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Conversion core first, then the CLI-facing verbs.
pub mod convention;
pub mod error;
pub mod grid;
pub mod matfile;
pub mod odf_table;
pub mod peaks;
pub mod split;
pub mod volume;

pub mod background;
pub mod batch;
pub mod cli;
pub mod forward;
pub mod inspect;
pub mod models;
pub mod report;
pub mod reverse;
pub mod scratch;
pub mod tools;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{ConvertError, Result};
