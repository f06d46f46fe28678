//! Still-frame acquisition from the counter camera.

pub mod command;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use log::warn;

use crate::settings::CaptureSettings;

pub use command::CommandCapture;

#[async_trait]
pub trait CaptureSource: Send + Sync {
    fn name(&self) -> &str;

    async fn capture_frame(&self) -> Result<DynamicImage>;
}

/// Tries each source in order; the first frame wins.
pub struct CaptureChain {
    sources: Vec<Box<dyn CaptureSource>>,
}

impl CaptureChain {
    pub fn new(sources: Vec<Box<dyn CaptureSource>>) -> Self {
        Self { sources }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Self {
        if let Some(still) = &settings.still_image {
            return Self::new(vec![Box::new(FileCapture::new(still.clone()))]);
        }
        let sources = settings
            .commands
            .iter()
            .map(|argv| {
                Box::new(CommandCapture::new(argv.clone(), settings.image_path.clone()))
                    as Box<dyn CaptureSource>
            })
            .collect();
        Self::new(sources)
    }
}

#[async_trait]
impl CaptureSource for CaptureChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        let mut last_err = anyhow!("no capture source configured");
        for source in &self.sources {
            match source.capture_frame().await {
                Ok(frame) => return Ok(frame),
                Err(err) => {
                    warn!("capture via {} failed: {err:#}", source.name());
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

/// Serves a fixed image file; handy on machines without a camera.
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaptureSource for FileCapture {
    fn name(&self) -> &str {
        "file"
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            image::open(&path).with_context(|| format!("failed to decode {}", path.display()))
        })
        .await
        .context("image decode worker join failed")?
    }
}
