use clap::Parser;
use std::path::PathBuf;
use training::artifacts::BEST_CHECKPOINT;
use training::util::{init_tracing, validate_backend_choice, BackendKind};
use training::{run_eval, Overrides, TrainConfig};
use voc_dataset::{Split, CLASS_NAMES};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a segmentation checkpoint on a VOC split (mIoU / pixel accuracy)"
)]
struct Args {
    /// YAML run configuration the checkpoint was trained with.
    #[arg(long)]
    config: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Checkpoint path (defaults to the run's best_model.bin).
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Split to evaluate: train, val or test.
    #[arg(long, default_value = "val")]
    split: Split,
    /// Where to write colorized predictions (defaults to <run dir>/predictions_<split>).
    #[arg(long)]
    predictions_out: Option<PathBuf>,
    /// Override the run id (results directory name).
    #[arg(long)]
    run_id: Option<String>,
    /// Override the VOC root.
    #[arg(long)]
    data_root: Option<String>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let mut cfg = TrainConfig::from_path(&args.config)?;
    cfg.apply_overrides(&Overrides {
        run_id: args.run_id,
        data_root: args.data_root,
        ..Default::default()
    })?;

    let checkpoint = args
        .checkpoint
        .unwrap_or_else(|| cfg.run_dir().join(BEST_CHECKPOINT));
    let predictions_out = args
        .predictions_out
        .unwrap_or_else(|| cfg.run_dir().join(format!("predictions_{}", args.split)));

    let metrics = run_eval(&cfg, &checkpoint, args.split, Some(predictions_out.as_path()))?;

    println!(
        "Eval complete: mIoU={:.4}, pixel_acc={:.4}, loss={:.4} ({} samples)",
        metrics.miou, metrics.pixel_acc, metrics.loss, metrics.samples
    );
    for (class, iou) in metrics.per_class_iou.iter().enumerate() {
        let name = CLASS_NAMES.get(class).copied().unwrap_or("?");
        match iou {
            Some(v) => println!("  {class:>2} {name:<12} {v:.4}"),
            None => println!("  {class:>2} {name:<12} -"),
        }
    }
    Ok(())
}
