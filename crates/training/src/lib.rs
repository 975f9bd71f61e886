#![recursion_limit = "256"]

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod early_stop;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use artifacts::{EpochRecord, EvalMetrics, RunArtifacts, RunSummary};
pub use config::{ConfigError, Overrides, TrainConfig};
pub use early_stop::{EarlyStopping, StopDecision};
pub use metrics::{iou, pixel_acc, ConfusionMatrix};
pub use schedule::LrSchedule;
pub use trainer::{evaluate, model_test, run_eval, run_train, train_model, ADBackend};
pub use util::{init_tracing, validate_backend_choice, BackendKind};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
