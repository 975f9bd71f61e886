//! PASCAL VOC segmentation data for Burn training loops.
//!
//! This crate provides utilities for:
//! - Indexing `ImageSets/Segmentation/<split>.txt` lists against `JPEGImages/` and `SegmentationClass/`
//! - Decoding palette masks back to class indices (boundaries become the ignore label)
//! - Joint image/mask augmentation and ImageNet normalization
//! - Burn-compatible batch iteration
//! - Inverse-frequency class weights

pub mod aug;
pub mod batch;
pub mod index;
pub mod palette;
pub mod types;
pub mod weights;

pub use aug::{
    Augment, ColorJitter, DatasetConfig, ScaleJitter, TransformPipeline, TransformPipelineBuilder,
};
pub use batch::{build_train_val_iters, BatchIter, SegBatch};
pub use index::{index_split, load_sample, load_split_dataset, split_list_path, summarize_split};
pub use palette::{colorize, decode_mask, voc_colormap, CLASS_NAMES, NUM_VOC_CLASSES};
pub use types::*;
pub use weights::{class_weights, pixel_counts, weights_from_counts};
