//! Indexing VOC split lists and loading individual samples.

use crate::aug::TransformPipeline;
use crate::palette::decode_mask_image;
use crate::types::{DatasetResult, SampleIndex, SegSample, Split, SplitSummary, VocError};
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGE_DIR: &str = "JPEGImages";
pub const MASK_DIR: &str = "SegmentationClass";
pub const SPLIT_DIR: &str = "ImageSets/Segmentation";

/// Path of the id list for `split` under a VOC root (e.g. `VOCdevkit/VOC2012`).
pub fn split_list_path(root: &Path, split: Split) -> PathBuf {
    root.join(SPLIT_DIR).join(format!("{}.txt", split.as_str()))
}

fn read_split_ids(root: &Path, split: Split) -> DatasetResult<Vec<String>> {
    let list = split_list_path(root, split);
    let raw = fs::read_to_string(&list).map_err(|e| VocError::Io {
        path: list.clone(),
        source: e,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn sample_paths(root: &Path, id: &str) -> SampleIndex {
    SampleIndex {
        id: id.to_string(),
        image_path: root.join(IMAGE_DIR).join(format!("{id}.jpg")),
        mask_path: root.join(MASK_DIR).join(format!("{id}.png")),
    }
}

/// Index every sample listed for `split`, failing on the first missing image or mask.
pub fn index_split(root: &Path, split: Split) -> DatasetResult<Vec<SampleIndex>> {
    let ids = read_split_ids(root, split)?;
    let mut indices = Vec::with_capacity(ids.len());
    for id in ids {
        let idx = sample_paths(root, &id);
        if !idx.image_path.exists() {
            return Err(VocError::MissingFile {
                id,
                kind: "image",
                path: idx.image_path,
            });
        }
        if !idx.mask_path.exists() {
            return Err(VocError::MissingFile {
                id,
                kind: "mask",
                path: idx.mask_path,
            });
        }
        indices.push(idx);
    }
    Ok(indices)
}

/// Count listed vs. present files for a split without failing on gaps.
pub fn summarize_split(root: &Path, split: Split) -> DatasetResult<SplitSummary> {
    let ids = read_split_ids(root, split)?;
    let mut summary = SplitSummary {
        split: Some(split),
        listed: ids.len(),
        ..Default::default()
    };
    for id in &ids {
        let idx = sample_paths(root, id);
        let has_image = idx.image_path.exists();
        let has_mask = idx.mask_path.exists();
        if !has_image {
            summary.missing_image += 1;
        }
        if !has_mask {
            summary.missing_mask += 1;
        }
        if has_image && has_mask {
            summary.present += 1;
        }
    }
    Ok(summary)
}

pub(crate) fn read_pair(idx: &SampleIndex) -> DatasetResult<(image::RgbImage, image::GrayImage)> {
    let img = image::open(&idx.image_path)
        .map_err(|e| VocError::Image {
            path: idx.image_path.clone(),
            source: e,
        })?
        .to_rgb8();
    let raw_mask = image::open(&idx.mask_path).map_err(|e| VocError::Image {
        path: idx.mask_path.clone(),
        source: e,
    })?;
    let mask = decode_mask_image(&raw_mask);
    if mask.dimensions() != img.dimensions() {
        return Err(VocError::Mask {
            path: idx.mask_path.clone(),
            mask_w: mask.width(),
            mask_h: mask.height(),
            image_w: img.width(),
            image_h: img.height(),
        });
    }
    Ok((img, mask))
}

pub fn load_sample(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    salt: u64,
) -> DatasetResult<SegSample> {
    let (img, mask) = read_pair(idx)?;
    pipeline.apply(img, mask, &idx.id, salt)
}

/// Load a whole split into memory (eager). Prefer `BatchIter` for anything but small sets.
pub fn load_split_dataset(
    root: &Path,
    split: Split,
    pipeline: &TransformPipeline,
) -> DatasetResult<Vec<SegSample>> {
    index_split(root, split)?
        .iter()
        .map(|idx| load_sample(idx, pipeline, 0))
        .collect()
}
