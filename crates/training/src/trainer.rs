//! Train / validate / test orchestration.

use crate::artifacts::{
    write_prediction_pair, EpochRecord, EvalMetrics, RunArtifacts, RunSummary,
};
use crate::checkpoint::{self, CheckpointMeta};
use crate::config::TrainConfig;
use crate::early_stop::{EarlyStopping, StopDecision};
use crate::loss::{class_weight_tensor, cross_entropy, scalar};
use crate::metrics::{iou, ConfusionMatrix, Mean};
use crate::schedule::LrSchedule;
use crate::TrainBackend;
use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use seg_models::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use voc_dataset::{class_weights, index_split, split_list_path, BatchIter, SampleIndex, Split};

pub type ADBackend = Autodiff<TrainBackend>;

/// One evaluated sample, handed to an evaluation sink.
pub struct SamplePrediction<'a> {
    pub id: &'a str,
    pub pred: &'a [i64],
    pub target: &'a [i64],
    pub width: u32,
    pub height: u32,
}

/// Build the configured model on the autodiff backend and train it.
pub fn run_train(cfg: &TrainConfig) -> anyhow::Result<RunSummary> {
    let device = <ADBackend as Backend>::Device::default();
    let num_classes = cfg.num_classes;
    if cfg.encoder_weights.is_some() && cfg.model != ModelKind::Resnet {
        tracing::warn!(model = %cfg.model, "encoder_weights is only used by the resnet model; ignoring");
    }
    match cfg.model {
        ModelKind::Fcn => train_model(
            Fcn::<ADBackend>::new(FcnConfig { num_classes }, &device),
            cfg,
            &device,
        ),
        ModelKind::Unet => train_model(
            UNet::<ADBackend>::new(
                UNetConfig {
                    num_classes,
                    ..Default::default()
                },
                &device,
            ),
            cfg,
            &device,
        ),
        ModelKind::Resnet => {
            let mut model = ResNetFcn::<ADBackend>::new(
                ResNetFcnConfig {
                    num_classes,
                    depth: cfg.resnet_depth,
                },
                &device,
            );
            if let Some(path) = &cfg.encoder_weights {
                model = model.load_encoder(path, &device).map_err(|e| {
                    anyhow::anyhow!("failed to load encoder weights {}: {e}", path.display())
                })?;
                tracing::info!(path = %path.display(), "loaded encoder weights");
            }
            train_model(model, cfg, &device)
        }
        ModelKind::NewArch => train_model(
            SkipFcn::<ADBackend>::new(
                SkipFcnConfig {
                    num_classes,
                    ..Default::default()
                },
                &device,
            ),
            cfg,
            &device,
        ),
    }
}

/// Load a checkpoint into the configured model (no autodiff) and evaluate `split`.
/// Colorized predictions for the first `prediction_samples` go to `predictions_out`.
pub fn run_eval(
    cfg: &TrainConfig,
    checkpoint_path: &Path,
    split: Split,
    predictions_out: Option<&Path>,
) -> anyhow::Result<EvalMetrics> {
    let device = <TrainBackend as Backend>::Device::default();
    let num_classes = cfg.num_classes;
    if let Some(meta) = checkpoint::load_meta(checkpoint_path) {
        if meta.model != cfg.model || meta.num_classes != num_classes {
            anyhow::bail!(
                "checkpoint {} holds a {} model with {} classes but the config asks for {} with {}",
                checkpoint_path.display(),
                meta.model,
                meta.num_classes,
                cfg.model,
                num_classes
            );
        }
    }
    match cfg.model {
        ModelKind::Fcn => eval_checkpoint(
            Fcn::<TrainBackend>::new(FcnConfig { num_classes }, &device),
            cfg,
            checkpoint_path,
            split,
            predictions_out,
            &device,
        ),
        ModelKind::Unet => eval_checkpoint(
            UNet::<TrainBackend>::new(
                UNetConfig {
                    num_classes,
                    ..Default::default()
                },
                &device,
            ),
            cfg,
            checkpoint_path,
            split,
            predictions_out,
            &device,
        ),
        ModelKind::Resnet => eval_checkpoint(
            ResNetFcn::<TrainBackend>::new(
                ResNetFcnConfig {
                    num_classes,
                    depth: cfg.resnet_depth,
                },
                &device,
            ),
            cfg,
            checkpoint_path,
            split,
            predictions_out,
            &device,
        ),
        ModelKind::NewArch => eval_checkpoint(
            SkipFcn::<TrainBackend>::new(
                SkipFcnConfig {
                    num_classes,
                    ..Default::default()
                },
                &device,
            ),
            cfg,
            checkpoint_path,
            split,
            predictions_out,
            &device,
        ),
    }
}

fn eval_checkpoint<B, M>(
    model: M,
    cfg: &TrainConfig,
    checkpoint_path: &Path,
    split: Split,
    predictions_out: Option<&Path>,
    device: &B::Device,
) -> anyhow::Result<EvalMetrics>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let model = checkpoint::load_model(model, checkpoint_path, device).map_err(|e| {
        anyhow::anyhow!(
            "failed to load checkpoint {}: {e}",
            checkpoint_path.display()
        )
    })?;
    let split = resolve_split(&cfg.data_root, split);
    let indices = index_split(&cfg.data_root, split)
        .with_context(|| format!("failed to index {split} split"))?;
    let metrics = evaluate_with_predictions(&model, cfg, &indices, None, predictions_out, device)?;
    log_eval(split.as_str(), None, &metrics);
    Ok(metrics)
}

/// The VOC 2012 release ships no public test masks; fall back to val when the list is absent.
pub fn resolve_split(root: &Path, split: Split) -> Split {
    if split == Split::Test && !split_list_path(root, Split::Test).exists() {
        tracing::warn!(
            "no {} list under {}; evaluating on val instead",
            split_list_path(root, Split::Test).display(),
            root.display()
        );
        return Split::Val;
    }
    split
}

/// Full run: baseline validation, the epoch loop with best-checkpointing and early
/// stopping, then a test pass with the best weights.
pub fn train_model<B, M>(
    model: M,
    cfg: &TrainConfig,
    device: &B::Device,
) -> anyhow::Result<RunSummary>
where
    B: AutodiffBackend,
    M: SegmentationModel<B> + AutodiffModule<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    let artifacts = RunArtifacts::create(cfg)?;
    let train_idx = index_split(&cfg.data_root, Split::Train)
        .with_context(|| format!("failed to index train split under {}", cfg.data_root.display()))?;
    let val_idx = index_split(&cfg.data_root, Split::Val)
        .with_context(|| format!("failed to index val split under {}", cfg.data_root.display()))?;
    if train_idx.is_empty() {
        anyhow::bail!("train split under {} is empty", cfg.data_root.display());
    }

    let weights = if cfg.class_weights {
        Some(class_weights(&train_idx, cfg.num_classes)?)
    } else {
        None
    };
    let train_weights = weights
        .as_deref()
        .map(|w| class_weight_tensor::<B>(w, device));
    let eval_weights = weights
        .as_deref()
        .map(|w| class_weight_tensor::<B::InnerBackend>(w, device));

    let mut model = model;
    if cfg.freeze_encoder {
        if model.supports_freeze() {
            model = model.freeze_encoder();
            tracing::info!("encoder frozen");
        } else {
            tracing::warn!(model = %cfg.model, "freeze_encoder has no effect on this model");
        }
    }

    let schedule = LrSchedule::from_config(cfg);
    let train_ds = cfg.train_dataset_config();
    let batch_size = cfg.batch_size;
    let log_every = cfg.log_every.max(1);
    tracing::info!(
        run_id = %cfg.run_id,
        model = %cfg.model,
        params = model.num_params(),
        train = train_idx.len(),
        val = val_idx.len(),
        batch_size,
        epochs = cfg.epochs,
        "starting run in {}",
        artifacts.dir().display()
    );
    tracing::info!("lr schedule: {}", schedule.describe());

    let t_val = Instant::now();
    let baseline = evaluate_with_predictions(
        &model.valid(),
        cfg,
        &val_idx,
        eval_weights.clone(),
        None,
        device,
    )?;
    log_eval("val", Some(0), &baseline);
    artifacts.append_epoch(&EpochRecord {
        epoch: 0,
        train_loss: None,
        val_loss: baseline.loss,
        val_miou: baseline.batch_miou,
        val_pixel_acc: baseline.pixel_acc,
        lr: schedule.lr_at(0.0),
        seconds: t_val.elapsed().as_secs_f64(),
    })?;

    let mut optim = AdamConfig::new().init();
    let mut stopper = EarlyStopping::new(cfg.early_stopping.patience, cfg.early_stopping.min_delta);
    let mut best_miou = f64::NEG_INFINITY;
    let mut best_epoch = None;
    let mut epochs_run = 0;
    let mut stopped_early = false;
    let mut next_lr = schedule.lr_at(0.0);

    for epoch in 0..cfg.epochs {
        let started = Instant::now();
        let mut iter = BatchIter::for_epoch(train_idx.clone(), train_ds.clone(), epoch)?;
        let iters = iter.batches_per_epoch(batch_size).max(1);
        let mut train_loss = Mean::default();
        let mut lr = next_lr;
        let mut step = 0usize;

        while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
            lr = next_lr;
            let logits = model.forward(batch.images);
            let loss = cross_entropy(logits, batch.masks, train_weights.clone());
            let loss_value = scalar(loss.clone().detach());
            if !loss_value.is_finite() {
                anyhow::bail!("loss became {loss_value} at epoch {} iter {step}", epoch + 1);
            }
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
            next_lr = schedule.lr_after_step(epoch, step, iters);
            train_loss.push(loss_value as f64);

            if step % log_every == 0 {
                tracing::info!(epoch = epoch + 1, iter = step, lr, "loss: {loss_value:.4}");
            }
            step += 1;
        }
        let train_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            epoch = epoch + 1,
            "finished epoch in {train_seconds:.1}s, mean loss {:.4}",
            train_loss.value()
        );

        let metrics = evaluate_with_predictions(
            &model.valid(),
            cfg,
            &val_idx,
            eval_weights.clone(),
            None,
            device,
        )?;
        log_eval("val", Some(epoch + 1), &metrics);
        epochs_run = epoch + 1;

        // Model selection uses the mean of per-batch mIoU.
        let val_miou = metrics.batch_miou;
        if val_miou > best_miou {
            best_miou = val_miou;
            best_epoch = Some(epoch + 1);
            save_best::<B, M>(&model, cfg, &artifacts, epoch + 1, val_miou)?;
        }

        artifacts.append_epoch(&EpochRecord {
            epoch: epoch + 1,
            train_loss: Some(train_loss.value()),
            val_loss: metrics.loss,
            val_miou,
            val_pixel_acc: metrics.pixel_acc,
            lr,
            seconds: started.elapsed().as_secs_f64(),
        })?;

        match stopper.update(val_miou as f32) {
            StopDecision::Stop => {
                tracing::info!(
                    "early stopping: no val mIoU improvement for {} epochs (best {:.4})",
                    cfg.early_stopping.patience,
                    stopper.best()
                );
                stopped_early = true;
                break;
            }
            StopDecision::NoImprovement { bad_epochs } => {
                tracing::debug!(bad_epochs, "val mIoU did not improve");
            }
            StopDecision::Improved => {}
        }
    }

    if best_epoch.is_none() {
        // Only reachable when every val mIoU was NaN; keep the final weights testable.
        save_best::<B, M>(&model, cfg, &artifacts, epochs_run, f64::NAN)?;
    }

    let test = model_test(&model, cfg, &artifacts, eval_weights, device)?;
    let summary = RunSummary {
        run_id: cfg.run_id.clone(),
        model: cfg.model.to_string(),
        best_epoch,
        best_val_miou: if best_miou.is_finite() { best_miou } else { 0.0 },
        epochs_run,
        stopped_early,
        test: Some(test),
    };
    artifacts.write_summary(&summary)?;
    tracing::info!(
        best_epoch = ?summary.best_epoch,
        best_val_miou = summary.best_val_miou,
        "run complete; results in {}",
        artifacts.dir().display()
    );
    Ok(summary)
}

fn save_best<B: Backend, M: Module<B>>(
    model: &M,
    cfg: &TrainConfig,
    artifacts: &RunArtifacts,
    epoch: usize,
    val_miou: f64,
) -> anyhow::Result<()> {
    let path = artifacts.best_checkpoint();
    checkpoint::save_model::<B, M>(model, &path)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
    checkpoint::save_meta(
        &path,
        &CheckpointMeta {
            model: cfg.model,
            num_classes: cfg.num_classes,
            resnet_depth: cfg.resnet_depth,
            epoch,
            val_miou,
        },
    )?;
    tracing::info!(epoch, val_miou, "saved best checkpoint to {}", path.display());
    Ok(())
}

/// Evaluate the best checkpoint (falling back to `model`'s current weights) on the
/// test split and write prediction PNGs into the run directory.
pub fn model_test<B, M>(
    model: &M,
    cfg: &TrainConfig,
    artifacts: &RunArtifacts,
    class_weights: Option<Tensor<B::InnerBackend, 1>>,
    device: &B::Device,
) -> anyhow::Result<EvalMetrics>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    let ckpt = artifacts.best_checkpoint();
    let inner = match checkpoint::load_model(model.valid(), &ckpt, device) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::warn!("could not load {} ({e}); testing final weights", ckpt.display());
            model.valid()
        }
    };
    let split = resolve_split(&cfg.data_root, Split::Test);
    let indices = index_split(&cfg.data_root, split)
        .with_context(|| format!("failed to index {split} split"))?;
    let predictions = artifacts.predictions_dir();
    let metrics = evaluate_with_predictions(
        &inner,
        cfg,
        &indices,
        class_weights,
        Some(predictions.as_path()),
        device,
    )?;
    log_eval(&format!("test({split})"), None, &metrics);
    Ok(metrics)
}

fn evaluate_with_predictions<B, M>(
    model: &M,
    cfg: &TrainConfig,
    indices: &[SampleIndex],
    class_weights: Option<Tensor<B, 1>>,
    predictions_out: Option<&Path>,
    device: &B::Device,
) -> anyhow::Result<EvalMetrics>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let mut remaining = if predictions_out.is_some() {
        cfg.prediction_samples
    } else {
        0
    };
    let out: Option<PathBuf> = predictions_out.map(Path::to_path_buf);
    evaluate(
        model,
        indices,
        cfg,
        class_weights,
        device,
        |sample: SamplePrediction<'_>| {
            if remaining == 0 {
                return Ok(());
            }
            if let Some(dir) = &out {
                write_prediction_pair(
                    dir,
                    sample.id,
                    sample.pred,
                    sample.target,
                    sample.width,
                    sample.height,
                )?;
                remaining -= 1;
            }
            Ok(())
        },
    )
}

/// Run `model` over `indices` without gradients and aggregate loss, mIoU and pixel accuracy.
///
/// `sink` sees every sample's prediction in loader order.
pub fn evaluate<B, M, F>(
    model: &M,
    indices: &[SampleIndex],
    cfg: &TrainConfig,
    class_weights: Option<Tensor<B, 1>>,
    device: &B::Device,
    mut sink: F,
) -> anyhow::Result<EvalMetrics>
where
    B: Backend,
    M: SegmentationModel<B>,
    F: FnMut(SamplePrediction<'_>) -> anyhow::Result<()>,
{
    let num_classes = model.num_classes();
    let mut iter = BatchIter::from_indices(indices.to_vec(), cfg.eval_dataset_config())?;
    let mut confusion = ConfusionMatrix::new(num_classes);
    let mut loss = Mean::default();
    let mut batch_miou = Mean::default();
    let mut samples = 0usize;

    while let Some(batch) = iter.next_batch::<B>(cfg.batch_size, device)? {
        let [_, _, height, width] = batch.images.dims();
        let logits = model.forward(batch.images);
        let batch_loss = cross_entropy(logits.clone(), batch.masks.clone(), class_weights.clone());
        loss.push(scalar(batch_loss) as f64);

        let pred: Vec<i64> = logits.argmax(1).into_data().iter::<i64>().collect();
        let target: Vec<i64> = batch.masks.into_data().iter::<i64>().collect();
        confusion.update(&pred, &target);
        batch_miou.push(iou(&pred, &target, num_classes));

        let plane = height * width;
        for (i, id) in batch.ids.iter().enumerate() {
            let range = i * plane..(i + 1) * plane;
            sink(SamplePrediction {
                id,
                pred: &pred[range.clone()],
                target: &target[range],
                width: width as u32,
                height: height as u32,
            })?;
        }
        samples += batch.ids.len();
    }

    Ok(EvalMetrics {
        loss: loss.value(),
        miou: confusion.mean_iou(),
        batch_miou: batch_miou.value(),
        pixel_acc: confusion.pixel_acc(),
        per_class_iou: confusion.class_iou(),
        samples,
    })
}

fn log_eval(split: &str, epoch: Option<usize>, m: &EvalMetrics) {
    match epoch {
        Some(epoch) => tracing::info!(
            epoch,
            samples = m.samples,
            "{split}: loss {:.4}, mIoU {:.4} (batch mean {:.4}), pixel acc {:.4}",
            m.loss,
            m.miou,
            m.batch_miou,
            m.pixel_acc
        ),
        None => tracing::info!(
            samples = m.samples,
            "{split}: loss {:.4}, mIoU {:.4} (batch mean {:.4}), pixel acc {:.4}",
            m.loss,
            m.miou,
            m.batch_miou,
            m.pixel_acc
        ),
    }
}
