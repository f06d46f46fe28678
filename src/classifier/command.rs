//! Classifier backed by an external inference helper.
//!
//! The frame is letterboxed to the model input size, written as PNG and the
//! helper is expected to print a JSON array of class probabilities.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use log::debug;
use uuid::Uuid;

use crate::settings::ClassifierSettings;
use crate::utils::process::run_for_stdout;

use super::{preprocess::letterbox, Classification, Classifier, LabelMap};

pub struct CommandClassifier {
    argv: Vec<String>,
    input_size: u32,
    scratch_dir: PathBuf,
    labels: LabelMap,
}

impl CommandClassifier {
    pub fn new(argv: Vec<String>, input_size: u32, labels: LabelMap) -> Self {
        Self {
            argv,
            input_size,
            scratch_dir: std::env::temp_dir(),
            labels,
        }
    }

    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        Self::new(
            settings.command.clone(),
            settings.input_size,
            LabelMap::from_settings(settings),
        )
    }
}

pub fn parse_scores(stdout: &str) -> Result<Vec<f32>> {
    serde_json::from_str(stdout.trim()).context("inference output is not a JSON array of scores")
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let input_path = self
            .scratch_dir
            .join(format!("beer-pos-{}.png", Uuid::new_v4()));

        let frame = image.clone();
        let size = self.input_size;
        let path_for_worker = input_path.clone();
        tokio::task::spawn_blocking(move || letterbox(&frame, size).save(&path_for_worker))
            .await
            .context("preprocess worker join failed")?
            .with_context(|| format!("failed to write model input {}", input_path.display()))?;

        let stdout = run_for_stdout(&self.argv, &input_path).await;
        if let Err(err) = tokio::fs::remove_file(&input_path).await {
            debug!("could not remove {}: {err}", input_path.display());
        }

        let scores = parse_scores(&stdout?)?;
        self.labels.interpret(&scores)
    }
}
