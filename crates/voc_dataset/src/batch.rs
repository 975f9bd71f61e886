//! Batch iteration for training, validation and test.
//!
//! Two environment knobs tune a running loader:
//! `VOC_DATASET_LOG_EVERY` (samples between throughput lines, `off`/`0` disables)
//! and `VOC_DATASET_PERMISSIVE` (`1`/`true`/`on` skips unreadable samples with a warning).

use crate::aug::{DatasetConfig, TransformPipeline};
use crate::index::{index_split, load_sample};
use crate::types::{DatasetResult, SampleIndex, SegSample, Split, VocError};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;
const LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct SegBatch<B: Backend> {
    /// Normalized images, `[batch, 3, height, width]`.
    pub images: Tensor<B, 4>,
    /// Class indices, `[batch, height, width]`.
    pub masks: Tensor<B, 3, Int>,
    pub ids: Vec<String>,
}

impl<B: Backend> SegBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Build train/val iterators for a VOC root; val gets augmentation and shuffling turned off.
pub fn build_train_val_iters(
    root: &Path,
    train_cfg: DatasetConfig,
) -> DatasetResult<(BatchIter, BatchIter)> {
    let val_cfg = train_cfg.for_eval();
    Ok((
        BatchIter::from_indices(index_split(root, Split::Train)?, train_cfg)?,
        BatchIter::from_indices(index_split(root, Split::Val)?, val_cfg)?,
    ))
}

fn log_every_from_env() -> Option<usize> {
    match std::env::var("VOC_DATASET_LOG_EVERY") {
        Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        Ok(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
        Ok(raw) => raw.trim().parse::<usize>().ok().filter(|&n| n > 0),
    }
}

fn permissive_from_env() -> bool {
    std::env::var("VOC_DATASET_PERMISSIVE")
        .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on"))
        .unwrap_or(false)
}

/// Loader throughput bookkeeping.
struct Throughput {
    started: Instant,
    load_time: Duration,
    samples: usize,
    batches: usize,
    skipped: usize,
    log_every: Option<usize>,
    last_log: Instant,
    logged_at_samples: usize,
}

impl Throughput {
    fn new(log_every: Option<usize>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            load_time: Duration::ZERO,
            samples: 0,
            batches: 0,
            skipped: 0,
            log_every,
            last_log: now,
            logged_at_samples: 0,
        }
    }

    fn record_batch(&mut self, samples: usize, load_time: Duration) {
        self.samples += samples;
        self.batches += 1;
        self.load_time += load_time;

        let Some(every) = self.log_every else {
            return;
        };
        if self.samples - self.logged_at_samples < every && self.last_log.elapsed() < LOG_INTERVAL
        {
            return;
        }
        let secs = self.started.elapsed().as_secs_f64().max(1e-3);
        tracing::debug!(
            batches = self.batches,
            samples = self.samples,
            skipped = self.skipped,
            "loader: {:.1} img/s over {secs:.1}s, {:.2} ms load per batch",
            self.samples as f64 / secs,
            self.load_time.as_secs_f64() * 1e3 / self.batches as f64
        );
        self.logged_at_samples = self.samples;
        self.last_log = Instant::now();
    }
}

pub struct BatchIter {
    indices: Vec<SampleIndex>,
    cursor: usize,
    drop_last: bool,
    salt: u64,
    permissive: bool,
    pipeline: TransformPipeline,
    stats: Throughput,
}

impl BatchIter {
    pub fn from_root(root: &Path, split: Split, cfg: DatasetConfig) -> DatasetResult<Self> {
        Self::from_indices(index_split(root, split)?, cfg)
    }

    pub fn from_indices(indices: Vec<SampleIndex>, cfg: DatasetConfig) -> DatasetResult<Self> {
        Self::for_epoch(indices, cfg, 0)
    }

    /// Iterator for a given epoch; the epoch reseeds shuffling and augmentation.
    pub fn for_epoch(
        mut indices: Vec<SampleIndex>,
        cfg: DatasetConfig,
        epoch: usize,
    ) -> DatasetResult<Self> {
        if let Some((w, h)) = cfg.target_size {
            if w == 0 || h == 0 {
                return Err(VocError::Other(format!("target_size must be non-zero, got {w}x{h}")));
            }
        }
        let salt = epoch as u64;
        if cfg.shuffle {
            let mut rng = cfg
                .seed
                .map(|seed| rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(salt)))
                .unwrap_or_else(|| rand::rngs::StdRng::from_rng(&mut rand::rng()));
            indices.shuffle(&mut rng);
        }
        let pipeline = cfg.pipeline();
        tracing::debug!(epoch, samples = indices.len(), "sample pipeline: {}", pipeline.describe());
        Ok(Self {
            indices,
            cursor: 0,
            drop_last: cfg.drop_last,
            salt,
            permissive: permissive_from_env(),
            pipeline,
            stats: Throughput::new(log_every_from_env()),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of batches one pass yields (before any permissive skips).
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        if self.drop_last {
            self.indices.len() / batch_size
        } else {
            self.indices.len().div_ceil(batch_size)
        }
    }

    /// Load, augment and stack the next `batch_size` samples onto `device`.
    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<SegBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            let remaining = self.indices.len() - self.cursor;
            if remaining == 0 || (self.drop_last && remaining < batch_size) {
                self.cursor = self.indices.len();
                return Ok(None);
            }
            let take = remaining.min(batch_size);
            let slice = &self.indices[self.cursor..self.cursor + take];
            self.cursor += take;

            let (pipeline, salt) = (&self.pipeline, self.salt);
            let started = Instant::now();
            // Indexed parallel collect keeps batch order stable.
            let loaded: Vec<(&SampleIndex, DatasetResult<SegSample>)> = slice
                .par_iter()
                .map(|idx| (idx, load_sample(idx, pipeline, salt)))
                .collect();
            let load_time = started.elapsed();

            let mut samples = Vec::with_capacity(loaded.len());
            for (idx, result) in loaded {
                match result {
                    Ok(sample) => samples.push(sample),
                    Err(e) if self.permissive => {
                        tracing::warn!(id = %idx.id, "skipping unreadable sample: {e}");
                        self.stats.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            // Every sample in this slice was skipped.
            let Some(first) = samples.first() else {
                continue;
            };
            let (width, height) = (first.width, first.height);
            if let Some(odd) = samples
                .iter()
                .find(|s| (s.width, s.height) != (width, height))
            {
                return Err(VocError::Other(format!(
                    "sample {} is {}x{} but the batch is {width}x{height}; set a target_size",
                    odd.id, odd.width, odd.height
                )));
            }

            let batch = stack::<B>(samples, width as usize, height as usize, device);
            self.stats.record_batch(batch.len(), load_time);
            return Ok(Some(batch));
        }
    }
}

fn stack<B: Backend>(
    samples: Vec<SegSample>,
    width: usize,
    height: usize,
    device: &B::Device,
) -> SegBatch<B> {
    let n = samples.len();
    let plane = width * height;
    let mut images = Vec::with_capacity(n * 3 * plane);
    let mut masks = Vec::with_capacity(n * plane);
    let mut ids = Vec::with_capacity(n);
    for sample in samples {
        images.extend(sample.image_chw);
        masks.extend(sample.mask);
        ids.push(sample.id);
    }
    SegBatch {
        images: Tensor::from_data(TensorData::new(images, [n, 3, height, width]), device),
        masks: Tensor::from_data(TensorData::new(masks, [n, height, width]), device),
        ids,
    }
}
