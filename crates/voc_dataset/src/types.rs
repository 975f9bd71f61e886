//! Core types, error definitions, and data structures for voc_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, VocError>;

/// Mask value for pixels that take no part in loss or metrics (VOC object boundaries).
pub const IGNORE_LABEL: i64 = 255;

#[derive(Debug, Error)]
pub enum VocError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{kind} file missing for sample {id}: {path}")]
    MissingFile {
        id: String,
        kind: &'static str,
        path: PathBuf,
    },
    #[error("mask {path} is {mask_w}x{mask_h} but image is {image_w}x{image_h}")]
    Mask {
        path: PathBuf,
        mask_w: u32,
        mask_h: u32,
        image_w: u32,
        image_h: u32,
    },
    #[error("{0}")]
    Other(String),
}

/// Dataset split, named after the VOC `ImageSets/Segmentation/<split>.txt` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = VocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(VocError::Other(format!(
                "unknown split '{other}' (expected train, val or test)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub id: String,
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SegSample {
    pub id: String,
    /// Image in CHW layout, mean/std normalized.
    pub image_chw: Vec<f32>,
    /// Row-major class indices; `IGNORE_LABEL` marks unlabeled pixels.
    pub mask: Vec<i64>,
    pub width: u32,
    pub height: u32,
}

/// Per-channel normalization applied after augmentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IMAGENET
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitSummary {
    pub split: Option<Split>,
    pub listed: usize,
    pub present: usize,
    pub missing_image: usize,
    pub missing_mask: usize,
}
