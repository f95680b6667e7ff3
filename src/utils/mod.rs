pub mod clock;
pub mod dates;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::{Builder as TempFileBuilder, TempDir};
use tokio::process::Command;
use which::which;

use crate::errors::{OpsError, OpsResult};

/// Finds a client tool (pg_dump, psql, rclone, docker) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        )
    })
}

/// Runs an external tool to completion and fails on a non-zero exit,
/// keeping stdout and stderr in the error for the operator.
pub async fn run_tool(mut command: Command, label: &str) -> Result<Output> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", label))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} failed with status: {}\nStdout: {}\nStderr: {}",
            label,
            output.status,
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(output)
}

/// Creates a uniquely named, process-private staging directory. It is
/// removed when the returned guard is dropped, including on early return
/// or when the owning future is cancelled.
pub fn staging_dir(root: Option<&Path>, prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = TempFileBuilder::new();
    builder.prefix(prefix);
    match root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}

/// Database names are passed to shell tools and quoted identifiers, so only
/// ASCII letters, digits, `_` and `-` are accepted.
pub fn validate_database_name(name: &str) -> OpsResult<()> {
    if name.trim().is_empty()
        || name.contains(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
    {
        return Err(OpsError::PreconditionViolated(format!(
            "invalid database name '{}': use only letters, numbers, underscores and hyphens",
            name
        )));
    }
    Ok(())
}
