use clap::Parser;
use std::path::PathBuf;
use training::util::{init_tracing, validate_backend_choice, BackendKind};
use training::{run_train, Overrides, TrainConfig};

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train FCN/U-Net/ResNet segmentation models on PASCAL VOC"
)]
struct TrainArgs {
    /// YAML run configuration.
    #[arg(long)]
    config: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Override the number of epochs.
    #[arg(long)]
    epochs: Option<usize>,
    /// Override the batch size.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Override the run id (results directory name).
    #[arg(long)]
    run_id: Option<String>,
    /// Override the VOC root.
    #[arg(long)]
    data_root: Option<String>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    validate_backend_choice(args.backend)?;

    let mut cfg = TrainConfig::from_path(&args.config)?;
    cfg.apply_overrides(&Overrides {
        epochs: args.epochs,
        batch_size: args.batch_size,
        run_id: args.run_id,
        data_root: args.data_root,
    })?;

    let summary = run_train(&cfg)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
