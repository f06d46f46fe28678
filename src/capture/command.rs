use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::DynamicImage;

use crate::utils::process::run_for_stdout;

/// Shells out to a still-capture tool (`libcamera-still`, `fswebcam`, ...)
/// that writes the frame to `output`.
pub struct CommandCapture {
    argv: Vec<String>,
    output: PathBuf,
    label: String,
}

impl CommandCapture {
    pub fn new(argv: Vec<String>, output: PathBuf) -> Self {
        let label = argv.first().cloned().unwrap_or_else(|| "command".into());
        Self {
            argv,
            output,
            label,
        }
    }
}

#[async_trait]
impl super::CaptureSource for CommandCapture {
    fn name(&self) -> &str {
        &self.label
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        // A stale frame from an earlier capture must never be classified again.
        match tokio::fs::remove_file(&self.output).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(anyhow!(err)
                    .context(format!("failed to clear {}", self.output.display())));
            }
        }

        run_for_stdout(&self.argv, &self.output).await?;

        let output = self.output.clone();
        tokio::task::spawn_blocking(move || {
            image::open(&output)
                .with_context(|| format!("capture wrote no readable frame at {}", output.display()))
        })
        .await
        .context("frame decode worker join failed")?
    }
}
