//
// tools.rs
// Odf-Tools-rs
//
// Runs the MRtrix3 command-line tools (amp2sh, sh2amp) as subprocesses with a timeout and output checks.
//
// Thales Matheus Mendonça Santos - November 2025

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ConvertError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Where to find the external tools and how long to wait for them.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub amp2sh: PathBuf,
    pub sh2amp: PathBuf,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            amp2sh: PathBuf::from("amp2sh"),
            sh2amp: PathBuf::from("sh2amp"),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl ToolConfig {
    /// Zero seconds disables the timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// `amp2sh -force -directions <dirs> <amplitudes> <output>`
    pub async fn fit_sh(&self, directions: &Path, amplitudes: &Path, output: &Path) -> Result<ToolOutput> {
        let args: Vec<OsString> = vec![
            "-force".into(),
            "-directions".into(),
            directions.into(),
            amplitudes.into(),
            output.into(),
        ];
        run_tool(&self.amp2sh, &args, output, self.timeout).await
    }

    /// `sh2amp -force -nonnegative <sh> <dirs> <output>`
    pub async fn sample_amplitudes(&self, sh: &Path, directions: &Path, output: &Path) -> Result<ToolOutput> {
        let args: Vec<OsString> = vec![
            "-force".into(),
            "-nonnegative".into(),
            sh.into(),
            directions.into(),
            output.into(),
        ];
        run_tool(&self.sh2amp, &args, output, self.timeout).await
    }
}

/// Captured console output of a finished tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` to completion and checks that it produced `expected_output`.
///
/// The child is killed if the wait is abandoned, either because `timeout`
/// elapsed or because the caller dropped the future.
pub async fn run_tool(
    program: &Path,
    args: &[OsString],
    expected_output: &Path,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    let tool = program.display().to_string();
    info!(tool = %tool, "running external tool");
    debug!(tool = %tool, ?args, "tool arguments");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ConvertError::ToolSpawn {
            tool: tool.clone(),
            source,
        })?;

    let waiting = child.wait_with_output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, waiting)
            .await
            .map_err(|_| ConvertError::ToolTimeout {
                tool: tool.clone(),
                timeout: limit,
            })??,
        None => waiting.await?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !stdout.trim().is_empty() {
        debug!(tool = %tool, "stdout: {}", stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!(tool = %tool, "stderr: {}", stderr.trim());
    }

    if !output.status.success() {
        return Err(ConvertError::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    if !expected_output.exists() {
        return Err(ConvertError::ToolOutputMissing {
            tool,
            path: expected_output.to_path_buf(),
        });
    }
    Ok(ToolOutput { stdout, stderr })
}
