//! Runs the external capture/inference helpers.

use std::{path::Path, process::Stdio};

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;

/// Placeholder in configured argv replaced by the image path.
pub const PATH_PLACEHOLDER: &str = "{path}";

pub fn build_command(argv: &[String], image_path: &Path) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;
    let path = image_path.to_string_lossy();

    let mut command = Command::new(program);
    command
        .args(args.iter().map(|arg| arg.replace(PATH_PLACEHOLDER, &path)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // A timed-out caller drops the future; the child must not outlive it.
        .kill_on_drop(true);
    Ok(command)
}

/// Runs to completion and returns stdout; a non-zero exit is an error carrying stderr.
pub async fn run_for_stdout(argv: &[String], image_path: &Path) -> Result<String> {
    let program = argv.first().cloned().unwrap_or_default();
    let output = build_command(argv, image_path)?
        .output()
        .await
        .with_context(|| format!("failed to spawn {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
