//! PASCAL VOC class names and the indexed-color palette used by `SegmentationClass` PNGs.

use crate::types::IGNORE_LABEL;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::OnceLock;

pub const NUM_VOC_CLASSES: usize = 21;

pub const CLASS_NAMES: [&str; NUM_VOC_CLASSES] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// The 256-entry VOC colormap (bits of the index interleaved into R/G/B, MSB first).
pub fn voc_colormap() -> &'static [[u8; 3]; 256] {
    static MAP: OnceLock<[[u8; 3]; 256]> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut map = [[0u8; 3]; 256];
        for (i, entry) in map.iter_mut().enumerate() {
            let mut c = i;
            let (mut r, mut g, mut b) = (0u8, 0u8, 0u8);
            for j in 0..8 {
                r |= ((c & 1) as u8) << (7 - j);
                g |= (((c >> 1) & 1) as u8) << (7 - j);
                b |= (((c >> 2) & 1) as u8) << (7 - j);
                c >>= 3;
            }
            *entry = [r, g, b];
        }
        map
    })
}

fn color_lookup() -> &'static HashMap<[u8; 3], i64> {
    static LOOKUP: OnceLock<HashMap<[u8; 3], i64>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let map = voc_colormap();
        (0..NUM_VOC_CLASSES)
            .map(|i| (map[i], i as i64))
            .chain(std::iter::once((map[IGNORE_LABEL as usize], IGNORE_LABEL)))
            .collect()
    })
}

/// Class index for a palette color; unknown colors are ignored.
pub fn class_for_color(rgb: [u8; 3]) -> i64 {
    color_lookup().get(&rgb).copied().unwrap_or(IGNORE_LABEL)
}

/// Decode a VOC mask into a single-channel image of class indices.
///
/// Grayscale masks carry indices directly; color masks go back through the palette.
pub fn decode_mask_image(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => {
            let rgb = other.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let p = rgb.get_pixel(x, y);
                Luma([class_for_color([p[0], p[1], p[2]]) as u8])
            })
        }
    }
}

/// Row-major class indices for a decoded mask.
pub fn decode_mask(img: &DynamicImage) -> Vec<i64> {
    decode_mask_image(img)
        .as_raw()
        .iter()
        .map(|&v| v as i64)
        .collect()
}

/// Render a class-index mask with the VOC palette.
pub fn colorize(mask: &[i64], width: u32, height: u32) -> RgbImage {
    let map = voc_colormap();
    let ignore = map[IGNORE_LABEL as usize];
    RgbImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        let color = match mask.get(idx).copied() {
            Some(c) if (0..256).contains(&c) => map[c as usize],
            _ => ignore,
        };
        Rgb(color)
    })
}

#[cfg(test)]
mod palette_tests {
    use super::*;

    #[test]
    fn well_known_colors() {
        let map = voc_colormap();
        assert_eq!(map[0], [0, 0, 0]);
        assert_eq!(map[1], [128, 0, 0]);
        assert_eq!(map[15], [192, 128, 128]);
        assert_eq!(map[255], [224, 224, 192]);
    }

    #[test]
    fn boundary_and_unknown_colors_are_ignored() {
        assert_eq!(class_for_color([224, 224, 192]), IGNORE_LABEL);
        assert_eq!(class_for_color([1, 2, 3]), IGNORE_LABEL);
        assert_eq!(class_for_color([128, 0, 0]), 1);
    }

    #[test]
    fn colorized_mask_decodes_back() {
        let mask: Vec<i64> = vec![0, 1, 7, 20, 255, 15];
        let rgb = DynamicImage::ImageRgb8(colorize(&mask, 3, 2));
        assert_eq!(decode_mask(&rgb), mask);
    }
}
