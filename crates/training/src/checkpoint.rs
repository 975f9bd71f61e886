use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use seg_models::ModelKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sidecar written next to a checkpoint so `eval` can rebuild the matching model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model: ModelKind,
    pub num_classes: usize,
    pub resnet_depth: usize,
    pub epoch: usize,
    pub val_miou: f64,
}

pub fn meta_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("json")
}

pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.clone().save_file(path, &recorder)
}

pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.load_file(path, &recorder, device)
}

pub fn save_meta(checkpoint: &Path, meta: &CheckpointMeta) -> anyhow::Result<()> {
    let path = meta_path(checkpoint);
    std::fs::write(&path, serde_json::to_string_pretty(meta)?)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))
}

pub fn load_meta(checkpoint: &Path) -> Option<CheckpointMeta> {
    let raw = std::fs::read_to_string(meta_path(checkpoint)).ok()?;
    serde_json::from_str(&raw).ok()
}
