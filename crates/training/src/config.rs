//! YAML run configuration.
//!
//! Every key is optional in the file; missing keys take the defaults below.
//! Paths accept `~` and `${VAR}`.

use seg_models::{resnet::blocks_per_stage, ModelKind, INPUT_STRIDE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use voc_dataset::{Augment, DatasetConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Epochs in the first cosine cycle.
    pub t0: f64,
    /// Cycle length multiplier after each restart.
    pub t_mult: f64,
    pub eta_min: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            t0: 2.0,
            t_mult: 1.0,
            eta_min: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EarlyStoppingConfig {
    /// Non-improving epochs tolerated before stopping; 0 disables.
    pub patience: usize,
    pub min_delta: f32,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 5,
            min_delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AugmentConfig {
    /// Probability with which each enabled augmentation fires per sample.
    pub prob: f32,
    pub hflip: bool,
    pub scale_jitter: bool,
    pub color_jitter: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            prob: 0.1,
            hflip: true,
            scale_jitter: true,
            color_jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    /// Name of the run directory under `results_root`.
    pub run_id: String,
    /// VOC root holding `JPEGImages/`, `SegmentationClass/`, `ImageSets/Segmentation/`.
    pub data_root: PathBuf,
    pub results_root: PathBuf,
    pub model: ModelKind,
    /// ResNet depth when `model: resnet` (18 or 34).
    pub resnet_depth: usize,
    pub num_classes: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Cosine annealing with warm restarts when true, constant rate otherwise.
    pub lr_schedule: bool,
    pub scheduler: SchedulerConfig,
    /// Weight the loss by inverse class frequency over the train split.
    pub class_weights: bool,
    /// Freeze the encoder (only meaningful for `resnet`).
    pub freeze_encoder: bool,
    /// Optional encoder record to initialize the ResNet encoder from.
    pub encoder_weights: Option<PathBuf>,
    pub early_stopping: EarlyStoppingConfig,
    /// `[width, height]`; both must be multiples of 32.
    pub image_size: [u32; 2],
    pub augment: AugmentConfig,
    pub seed: Option<u64>,
    /// Log the training loss every N iterations.
    pub log_every: usize,
    /// Test images to render as colorized prediction PNGs.
    pub prediction_samples: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            run_id: "default".to_string(),
            data_root: PathBuf::from("data/VOCdevkit/VOC2012"),
            results_root: PathBuf::from("results"),
            model: ModelKind::Fcn,
            resnet_depth: 18,
            num_classes: voc_dataset::NUM_VOC_CLASSES,
            epochs: 30,
            batch_size: 16,
            learning_rate: 1e-3,
            lr_schedule: true,
            scheduler: SchedulerConfig::default(),
            class_weights: true,
            freeze_encoder: false,
            encoder_weights: None,
            early_stopping: EarlyStoppingConfig::default(),
            image_size: [224, 224],
            augment: AugmentConfig::default(),
            seed: Some(42),
            log_every: 10,
            prediction_samples: 8,
        }
    }
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub run_id: Option<String>,
    pub data_root: Option<String>,
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse, expand paths and validate.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: TrainConfig = if raw.trim().is_empty() {
            TrainConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?
        };
        cfg.expand_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<(), ConfigError> {
        if let Some(epochs) = overrides.epochs {
            self.epochs = epochs;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(run_id) = &overrides.run_id {
            self.run_id = run_id.clone();
        }
        if let Some(root) = &overrides.data_root {
            self.data_root = expand_path(root);
        }
        self.validate()
    }

    fn expand_paths(&mut self) {
        self.data_root = expand_path(&self.data_root.to_string_lossy());
        self.results_root = expand_path(&self.results_root.to_string_lossy());
        self.encoder_weights = self
            .encoder_weights
            .as_ref()
            .map(|p| expand_path(&p.to_string_lossy()));
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.epochs == 0 {
            return invalid("epochs must be > 0".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0".into());
        }
        if self.num_classes < 2 || self.num_classes > 255 {
            return invalid(format!(
                "num_classes must be in 2..=255, got {}",
                self.num_classes
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        let stride = INPUT_STRIDE as u32;
        let [w, h] = self.image_size;
        if w == 0 || h == 0 || w % stride != 0 || h % stride != 0 {
            return invalid(format!(
                "image_size must be non-zero multiples of {stride}, got {w}x{h}"
            ));
        }
        if self.run_id.trim().is_empty()
            || self.run_id.contains(['/', '\\'])
            || self.run_id == "."
            || self.run_id == ".."
        {
            return invalid(format!(
                "run_id must be a plain directory name, got '{}'",
                self.run_id
            ));
        }
        if self.model == ModelKind::Resnet && blocks_per_stage(self.resnet_depth).is_none() {
            return invalid(format!(
                "resnet_depth must be 18 or 34, got {}",
                self.resnet_depth
            ));
        }
        if self.lr_schedule && (self.scheduler.t0 <= 0.0 || self.scheduler.t_mult < 1.0) {
            return invalid("scheduler needs t0 > 0 and t_mult >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.augment.prob) {
            return invalid(format!(
                "augment.prob must be in [0, 1], got {}",
                self.augment.prob
            ));
        }
        Ok(())
    }

    pub fn run_dir(&self) -> PathBuf {
        self.results_root.join(&self.run_id)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.image_size[0], self.image_size[1])
    }

    /// Loader settings for the training split.
    pub fn train_dataset_config(&self) -> DatasetConfig {
        let p = |enabled: bool| if enabled { self.augment.prob } else { 0.0 };
        let mut augment = Augment::NONE;
        augment.hflip_prob = p(self.augment.hflip);
        augment.scale.prob = p(self.augment.scale_jitter);
        augment.color.prob = p(self.augment.color_jitter);
        DatasetConfig {
            target_size: Some(self.target_size()),
            augment,
            shuffle: true,
            seed: self.seed,
            ..Default::default()
        }
    }

    /// Loader settings for val/test: same geometry, no augmentation, fixed order.
    pub fn eval_dataset_config(&self) -> DatasetConfig {
        self.train_dataset_config().for_eval()
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn expand_env_keeps_unknown_vars() {
        assert_eq!(
            expand_env("a/${TRAINING_TEST_SURELY_UNSET}/b"),
            "a/${TRAINING_TEST_SURELY_UNSET}/b"
        );
        assert_eq!(expand_env("no vars"), "no vars");
        assert_eq!(expand_env("dangling ${"), "dangling ${");
    }

    #[test]
    fn expand_env_substitutes_set_vars() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env("x${PATH}y"), format!("x{path}y"));
    }
}
