//! End-to-end checks over a tiny synthetic VOC tree.

use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use voc_dataset::{
    build_train_val_iters, class_weights, index_split, load_split_dataset, summarize_split,
    voc_colormap, Augment, BatchIter, DatasetConfig, Split, TransformPipelineBuilder, VocError,
    IGNORE_LABEL,
};

type B = NdArray<f32>;

/// Write `ids` as a split; each mask is left half class `cls`, right half background,
/// with a one-pixel boundary column in the VOC boundary color.
fn write_voc(root: &Path, split: &str, ids: &[(&str, u8)], size: (u32, u32)) -> anyhow::Result<()> {
    let (w, h) = size;
    fs::create_dir_all(root.join("JPEGImages"))?;
    fs::create_dir_all(root.join("SegmentationClass"))?;
    fs::create_dir_all(root.join("ImageSets/Segmentation"))?;
    let map = voc_colormap();
    let mut list = String::new();
    for (id, cls) in ids {
        let img = RgbImage::from_fn(w, h, |x, _| Rgb([(x * 20) as u8, 90, 160]));
        img.save(root.join("JPEGImages").join(format!("{id}.jpg")))?;
        let mask = RgbImage::from_fn(w, h, |x, _| {
            if x == w / 2 {
                Rgb(map[255])
            } else if x < w / 2 {
                Rgb(map[*cls as usize])
            } else {
                Rgb(map[0])
            }
        });
        mask.save(root.join("SegmentationClass").join(format!("{id}.png")))?;
        list.push_str(id);
        list.push('\n');
    }
    list.push('\n');
    fs::write(
        root.join("ImageSets/Segmentation").join(format!("{split}.txt")),
        list,
    )?;
    Ok(())
}

#[test]
fn index_and_batch_train_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_voc(root, "train", &[("a", 1), ("b", 15), ("c", 7)], (8, 6))?;

    let indices = index_split(root, Split::Train)?;
    assert_eq!(indices.len(), 3);
    assert_eq!(indices[0].id, "a");

    let cfg = DatasetConfig {
        target_size: None,
        shuffle: false,
        ..Default::default()
    };
    let mut iter = BatchIter::from_indices(indices, cfg)?;
    assert_eq!(iter.batches_per_epoch(2), 2);
    let device = Default::default();

    let first = iter.next_batch::<B>(2, &device)?.expect("first batch");
    assert_eq!(first.images.dims(), [2, 3, 6, 8]);
    assert_eq!(first.masks.dims(), [2, 6, 8]);
    assert_eq!(first.ids, vec!["a".to_string(), "b".to_string()]);

    let mask: Vec<i64> = first.masks.into_data().iter::<i64>().collect();
    // Row 0 of sample "a": classes 1 | boundary | background.
    assert_eq!(mask[0], 1);
    assert_eq!(mask[4], IGNORE_LABEL);
    assert_eq!(mask[7], 0);
    // Sample "b" starts after one 6x8 plane.
    assert_eq!(mask[48], 15);

    let second = iter.next_batch::<B>(2, &device)?.expect("second batch");
    assert_eq!(second.len(), 1);
    assert!(iter.next_batch::<B>(2, &device)?.is_none());
    Ok(())
}

#[test]
fn drop_last_skips_partial_batch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "val", &[("a", 1), ("b", 2), ("c", 3)], (4, 4))?;
    let cfg = DatasetConfig {
        target_size: None,
        shuffle: false,
        drop_last: true,
        ..Default::default()
    };
    let mut iter = BatchIter::from_root(tmp.path(), Split::Val, cfg)?;
    let device = Default::default();
    assert!(iter.next_batch::<B>(2, &device)?.is_some());
    assert!(iter.next_batch::<B>(2, &device)?.is_none());
    Ok(())
}

#[test]
fn resize_targets_are_applied_to_images_and_masks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "val", &[("a", 3)], (10, 10))?;
    let cfg = DatasetConfig {
        target_size: Some((32, 32)),
        shuffle: false,
        ..Default::default()
    };
    let mut iter = BatchIter::from_root(tmp.path(), Split::Val, cfg)?;
    let batch = iter
        .next_batch::<B>(4, &Default::default())?
        .expect("batch");
    assert_eq!(batch.images.dims(), [1, 3, 32, 32]);
    let mask: Vec<i64> = batch.masks.into_data().iter::<i64>().collect();
    assert!(mask.iter().all(|v| [0, 3, IGNORE_LABEL].contains(v)));
    Ok(())
}

#[test]
fn missing_mask_is_reported() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "train", &[("a", 1), ("b", 2)], (4, 4))?;
    fs::remove_file(tmp.path().join("SegmentationClass/b.png"))?;

    let err = index_split(tmp.path(), Split::Train).unwrap_err();
    assert!(matches!(err, VocError::MissingFile { kind: "mask", .. }));

    let summary = summarize_split(tmp.path(), Split::Train)?;
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.present, 1);
    assert_eq!(summary.missing_mask, 1);
    Ok(())
}

#[test]
fn missing_split_list_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = index_split(tmp.path(), Split::Test).unwrap_err();
    assert!(matches!(err, VocError::Io { .. }));
}

#[test]
fn class_weights_favor_rare_classes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "train", &[("a", 1), ("b", 1)], (8, 4))?;
    let indices = index_split(tmp.path(), Split::Train)?;
    let weights = class_weights(&indices, 3)?;
    assert_eq!(weights.len(), 3);
    // Background covers 3 of 8 columns, class 1 covers 4: class 1 is more frequent.
    assert!(weights[0] > weights[1]);
    // Class 2 never appears.
    assert_eq!(weights[2], 1.0);
    Ok(())
}

#[test]
fn train_and_val_iterators_share_geometry() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "train", &[("t0", 1), ("t1", 2), ("t2", 3)], (12, 9))?;
    write_voc(tmp.path(), "val", &[("v0", 4)], (12, 9))?;
    let cfg = DatasetConfig {
        target_size: Some((16, 16)),
        augment: Augment {
            hflip_prob: 1.0,
            ..Augment::NONE
        },
        seed: Some(7),
        ..Default::default()
    };
    let (train, mut val) = build_train_val_iters(tmp.path(), cfg)?;
    assert_eq!(train.len(), 3);
    assert_eq!(val.len(), 1);
    let batch = val
        .next_batch::<B>(8, &Default::default())?
        .expect("val batch");
    assert_eq!(batch.images.dims(), [1, 3, 16, 16]);
    // Val is never flipped: the class stays on the left edge.
    let mask: Vec<i64> = batch.masks.into_data().iter::<i64>().collect();
    assert_eq!(mask[0], 4);
    Ok(())
}

#[test]
fn eager_split_load_applies_the_pipeline() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc(tmp.path(), "val", &[("a", 2), ("b", 5)], (10, 6))?;
    let pipeline = TransformPipelineBuilder::new()
        .target_size(Some((8, 8)))
        .build();
    let samples = load_split_dataset(tmp.path(), Split::Val, &pipeline)?;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].id, "b");
    assert_eq!((samples[1].width, samples[1].height), (8, 8));
    assert_eq!(samples[1].image_chw.len(), 3 * 8 * 8);
    assert_eq!(samples[1].mask[0], 5);
    Ok(())
}
