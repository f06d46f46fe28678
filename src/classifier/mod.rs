//! Image -> menu item recognition.
//!
//! The model itself is opaque: a backend produces class probabilities and
//! [`LabelMap`] turns them into a menu name or `Unknown` using the
//! confidence threshold.

pub mod command;
pub mod preprocess;

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image::DynamicImage;

use crate::settings::ClassifierSettings;

pub use command::CommandClassifier;

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Item { name: String, confidence: f32 },
    Unknown { best_confidence: f32 },
}

impl Classification {
    pub fn item_name(&self) -> Option<&str> {
        match self {
            Classification::Item { name, .. } => Some(name),
            Classification::Unknown { .. } => None,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &DynamicImage) -> Result<Classification>;
}

#[derive(Debug, Clone)]
pub struct LabelMap {
    classes: Vec<String>,
    display_names: HashMap<String, String>,
    threshold: f32,
}

impl LabelMap {
    pub fn new(
        classes: Vec<String>,
        display_names: HashMap<String, String>,
        threshold: f32,
    ) -> Self {
        Self {
            classes,
            display_names,
            threshold,
        }
    }

    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        Self::new(
            settings.classes.clone(),
            settings.display_names.clone(),
            settings.threshold,
        )
    }

    /// Argmax over `probabilities`; below the threshold the frame is unknown.
    /// Classes without a display name keep their raw label.
    pub fn interpret(&self, probabilities: &[f32]) -> Result<Classification> {
        if probabilities.len() != self.classes.len() {
            bail!(
                "model returned {} scores for {} classes",
                probabilities.len(),
                self.classes.len()
            );
        }

        let Some((best_idx, &best)) = probabilities
            .iter()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            bail!("model returned no usable scores");
        };

        if best < self.threshold {
            return Ok(Classification::Unknown {
                best_confidence: best,
            });
        }

        let class = &self.classes[best_idx];
        let name = self
            .display_names
            .get(class)
            .cloned()
            .unwrap_or_else(|| class.clone());
        Ok(Classification::Item {
            name,
            confidence: best,
        })
    }
}
