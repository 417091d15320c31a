//
// main.rs
// Odf-Tools-rs
//
// Tokio entry point that hands off execution to the CLI layer so commands are resolved asynchronously.
//
// Thales Matheus Mendonça Santos - November 2025

use odf_tools::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
