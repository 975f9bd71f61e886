//! Per-run results directory: `<results_root>/<run_id>/`.
//!
//! ```text
//! config.yaml        resolved configuration
//! best_model.bin     best-validation-mIoU weights (+ best_model.json sidecar)
//! metrics.jsonl      one JSON object per validation pass
//! curves.csv         the same rows as CSV, for plotting
//! summary.json       final outcome
//! predictions/       <id>_pred.png / <id>_gt.png colorized masks
//! ```

use crate::config::TrainConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use voc_dataset::colorize;

pub const BEST_CHECKPOINT: &str = "best_model.bin";
const CURVES_HEADER: &str = "epoch,train_loss,val_loss,val_miou,val_pixel_acc,lr,seconds";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    /// Dataset-level mIoU from the accumulated confusion matrix.
    pub miou: f64,
    /// Mean of per-batch mIoU values; checkpointing and early stopping use this one.
    pub batch_miou: f64,
    pub pixel_acc: f64,
    pub per_class_iou: Vec<Option<f64>>,
    pub samples: usize,
}

/// One validation pass. Epoch 0 is the pre-training baseline and has no train loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub val_loss: f64,
    pub val_miou: f64,
    pub val_pixel_acc: f64,
    pub lr: f64,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub model: String,
    pub best_epoch: Option<usize>,
    pub best_val_miou: f64,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub test: Option<EvalMetrics>,
}

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create (or reuse) the run directory and write the resolved config into it.
    /// Metrics files and prediction PNGs from an earlier run with the same id are replaced.
    pub fn create(cfg: &TrainConfig) -> anyhow::Result<Self> {
        let dir = cfg.run_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run dir {}", dir.display()))?;
        let artifacts = Self { dir };
        for stale in ["metrics.jsonl", "curves.csv", "summary.json"] {
            let path = artifacts.dir.join(stale);
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        let predictions = artifacts.predictions_dir();
        if predictions.exists() {
            fs::remove_dir_all(&predictions)
                .with_context(|| format!("failed to clear {}", predictions.display()))?;
        }
        let yaml = serde_yaml::to_string(cfg)?;
        fs::write(artifacts.dir.join("config.yaml"), yaml)?;
        Ok(artifacts)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_checkpoint(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT)
    }

    pub fn predictions_dir(&self) -> PathBuf {
        self.dir.join("predictions")
    }

    pub fn append_epoch(&self, record: &EpochRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut jsonl = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("metrics.jsonl"))?;
        writeln!(jsonl, "{line}")?;

        let csv_path = self.dir.join("curves.csv");
        let new_file = !csv_path.exists();
        let mut csv = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&csv_path)?;
        if new_file {
            writeln!(csv, "{CURVES_HEADER}")?;
        }
        writeln!(
            csv,
            "{},{},{:.6},{:.6},{:.6},{:e},{:.3}",
            record.epoch,
            record
                .train_loss
                .map(|v| format!("{v:.6}"))
                .unwrap_or_default(),
            record.val_loss,
            record.val_miou,
            record.val_pixel_acc,
            record.lr,
            record.seconds
        )?;
        Ok(())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let path = self.dir.join("summary.json");
        fs::write(&path, serde_json::to_string_pretty(summary)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

pub fn write_prediction_pair(
    dir: &Path,
    id: &str,
    pred: &[i64],
    target: &[i64],
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    let pred_path = dir.join(format!("{id}_pred.png"));
    colorize(pred, width, height)
        .save(&pred_path)
        .with_context(|| format!("failed to write {}", pred_path.display()))?;
    let gt_path = dir.join(format!("{id}_gt.png"));
    colorize(target, width, height)
        .save(&gt_path)
        .with_context(|| format!("failed to write {}", gt_path.display()))?;
    Ok(())
}

/// Read back `metrics.jsonl`.
pub fn read_epoch_records(dir: &Path) -> anyhow::Result<Vec<EpochRecord>> {
    let raw = fs::read_to_string(dir.join("metrics.jsonl"))?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod artifacts_tests {
    use super::*;

    fn config_in(results: &Path) -> TrainConfig {
        TrainConfig {
            run_id: "rerun".into(),
            results_root: results.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn create_clears_outputs_of_an_earlier_run() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path());
        let first = RunArtifacts::create(&cfg).unwrap();
        fs::create_dir_all(first.predictions_dir()).unwrap();
        let old_png = first.predictions_dir().join("old_id_pred.png");
        fs::write(&old_png, b"stale").unwrap();
        fs::write(first.dir().join("metrics.jsonl"), "{}\n").unwrap();

        let second = RunArtifacts::create(&cfg).unwrap();
        assert!(!old_png.exists());
        assert!(!second.predictions_dir().exists());
        assert!(!second.dir().join("metrics.jsonl").exists());
        assert!(second.dir().join("config.yaml").exists());
    }
}
