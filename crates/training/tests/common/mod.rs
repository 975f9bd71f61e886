use image::{GrayImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::Path;

/// Write a tiny VOC-style tree: each sample's left half is class `1 + i % (classes - 1)`
/// painted in a matching color, right half background, with grayscale index masks.
pub fn write_synthetic_voc(
    root: &Path,
    splits: &[(&str, usize)],
    size: u32,
    classes: u8,
) -> std::io::Result<()> {
    fs::create_dir_all(root.join("JPEGImages"))?;
    fs::create_dir_all(root.join("SegmentationClass"))?;
    fs::create_dir_all(root.join("ImageSets/Segmentation"))?;
    for (split, count) in splits {
        let mut list = String::new();
        for i in 0..*count {
            let id = format!("{split}_{i:03}");
            let cls = 1 + (i as u8) % (classes - 1);
            let img = RgbImage::from_fn(size, size, |x, _| {
                if x < size / 2 {
                    Rgb([cls.wrapping_mul(80), 200, 40])
                } else {
                    Rgb([10, 10, 10])
                }
            });
            img.save(root.join("JPEGImages").join(format!("{id}.jpg")))
                .map_err(std::io::Error::other)?;
            let mask = GrayImage::from_fn(size, size, |x, _| {
                if x < size / 2 {
                    Luma([cls])
                } else {
                    Luma([0])
                }
            });
            mask.save(root.join("SegmentationClass").join(format!("{id}.png")))
                .map_err(std::io::Error::other)?;
            list.push_str(&id);
            list.push('\n');
        }
        fs::write(
            root.join("ImageSets/Segmentation").join(format!("{split}.txt")),
            list,
        )?;
    }
    Ok(())
}
