//! Joint image/mask augmentation and normalization pipeline.
//!
//! Geometric passes (flip, zoom) move the mask with the image; photometric passes
//! touch the image only. Masks are always resampled with nearest neighbour so no
//! new class indices appear.

use crate::types::{DatasetResult, Normalization, SegSample, VocError, IGNORE_LABEL};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use rand::{Rng, RngCore, SeedableRng};

/// Brightness/contrast jitter: factors drawn from `1 ± strength`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorJitter {
    pub prob: f32,
    pub strength: f32,
}

impl ColorJitter {
    fn apply(&self, img: &mut RgbImage, rng: &mut dyn RngCore) {
        if self.strength <= 0.0 || !fires(self.prob, rng) {
            return;
        }
        let brightness = 1.0 + rng.random_range(-self.strength..self.strength);
        let contrast = 1.0 + rng.random_range(-self.strength..self.strength);
        let lut: Vec<u8> = (0..=255u8)
            .map(|v| {
                let centered = (v as f32 / 255.0 - 0.5) * contrast + 0.5;
                ((centered * brightness).clamp(0.0, 1.0) * 255.0) as u8
            })
            .collect();
        for channel in img.iter_mut() {
            *channel = lut[*channel as usize];
        }
    }
}

/// Zoom about the center by a factor drawn from `[min, max)`, keeping the canvas size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleJitter {
    pub prob: f32,
    pub min: f32,
    pub max: f32,
}

impl ScaleJitter {
    /// Zooming out pads the mask with the ignore label; zooming in center-crops.
    fn apply(&self, img: &mut RgbImage, mask: &mut GrayImage, rng: &mut dyn RngCore) {
        if self.min <= 0.0 || self.max <= self.min || !fires(self.prob, rng) {
            return;
        }
        let factor = rng.random_range(self.min..self.max);
        let (w, h) = img.dimensions();
        let scaled = |side: u32| ((side as f32 * factor).round() as u32).max(1);
        let (sw, sh) = (scaled(w), scaled(h));
        let dx = (i64::from(w) - i64::from(sw)) / 2;
        let dy = (i64::from(h) - i64::from(sh)) / 2;

        let mut img_out = RgbImage::new(w, h);
        imageops::replace(
            &mut img_out,
            &imageops::resize(img, sw, sh, FilterType::Triangle),
            dx,
            dy,
        );
        let mut mask_out = GrayImage::from_pixel(w, h, Luma([IGNORE_LABEL as u8]));
        imageops::replace(
            &mut mask_out,
            &imageops::resize(mask, sw, sh, FilterType::Nearest),
            dx,
            dy,
        );
        *img = img_out;
        *mask = mask_out;
    }
}

/// Random augmentations for training samples. Each pass fires independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augment {
    /// Probability of a joint horizontal flip.
    pub hflip_prob: f32,
    pub scale: ScaleJitter,
    pub color: ColorJitter,
}

impl Augment {
    /// No augmentation at all (validation and test).
    pub const NONE: Augment = Augment {
        hflip_prob: 0.0,
        scale: ScaleJitter {
            prob: 0.0,
            min: 0.8,
            max: 1.2,
        },
        color: ColorJitter {
            prob: 0.0,
            strength: 0.1,
        },
    };

    /// Enable every pass with the same probability, keeping the default ranges.
    pub fn uniform(prob: f32) -> Self {
        let mut aug = Self::NONE;
        aug.hflip_prob = prob;
        aug.scale.prob = prob;
        aug.color.prob = prob;
        aug
    }

    pub fn is_identity(&self) -> bool {
        self.hflip_prob <= 0.0 && self.scale.prob <= 0.0 && self.color.prob <= 0.0
    }

    fn run(&self, img: &mut RgbImage, mask: &mut GrayImage, rng: &mut dyn RngCore) {
        if fires(self.hflip_prob, rng) {
            imageops::flip_horizontal_in_place(img);
            imageops::flip_horizontal_in_place(mask);
        }
        self.scale.apply(img, mask, rng);
        self.color.apply(img, rng);
    }
}

impl Default for Augment {
    fn default() -> Self {
        Self::NONE
    }
}

fn fires(prob: f32, rng: &mut dyn RngCore) -> bool {
    prob > 0.0 && rng.random::<f32>() < prob
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Resize every image/mask to `(width, height)`; with None all samples must already agree.
    pub target_size: Option<(u32, u32)>,
    pub augment: Augment,
    pub normalization: Normalization,
    pub shuffle: bool,
    /// Seeds shuffling and augmentation.
    pub seed: Option<u64>,
    pub drop_last: bool,
    /// Use this pipeline instead of one derived from the fields above.
    pub transform: Option<TransformPipeline>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_size: Some((224, 224)),
            augment: Augment::NONE,
            normalization: Normalization::IMAGENET,
            shuffle: true,
            seed: None,
            drop_last: false,
            transform: None,
        }
    }
}

impl DatasetConfig {
    /// Same geometry and normalization with every augmentation and shuffling disabled.
    pub fn for_eval(&self) -> Self {
        Self {
            augment: Augment::NONE,
            shuffle: false,
            drop_last: false,
            transform: None,
            ..self.clone()
        }
    }

    pub fn pipeline(&self) -> TransformPipeline {
        self.transform.clone().unwrap_or_else(|| TransformPipeline {
            target_size: self.target_size,
            augment: self.augment,
            normalization: self.normalization,
            seed: self.seed,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_size: Option<(u32, u32)>,
    pub augment: Augment,
    pub normalization: Normalization,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn describe(&self) -> String {
        let size = match self.target_size {
            Some((w, h)) => format!("{w}x{h}"),
            None => "native".to_string(),
        };
        let a = &self.augment;
        format!(
            "size {size}, hflip p={:.2}, scale p={:.2} [{:.2}, {:.2}), color p={:.2} ±{:.2}, seed {:?}",
            a.hflip_prob, a.scale.prob, a.scale.min, a.scale.max, a.color.prob, a.color.strength, self.seed
        )
    }

    /// Resize, augment and normalize one image/mask pair.
    ///
    /// `salt` is mixed into the seed so a seeded pipeline draws fresh
    /// augmentations each epoch while staying reproducible.
    pub fn apply(
        &self,
        img: RgbImage,
        mask: GrayImage,
        id: &str,
        salt: u64,
    ) -> DatasetResult<SegSample> {
        if img.dimensions() != mask.dimensions() {
            return Err(VocError::Other(format!(
                "sample {id}: image is {:?} but mask is {:?}",
                img.dimensions(),
                mask.dimensions()
            )));
        }
        let (mut img, mut mask) = match self.target_size {
            Some((w, h)) if (w, h) != img.dimensions() => (
                imageops::resize(&img, w, h, FilterType::Triangle),
                imageops::resize(&mask, w, h, FilterType::Nearest),
            ),
            _ => (img, mask),
        };

        if !self.augment.is_identity() {
            let mut rng: Box<dyn RngCore> = match self.seed {
                Some(seed) => Box::new(rand::rngs::StdRng::seed_from_u64(
                    seed ^ id_hash(id) ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15),
                )),
                None => Box::new(rand::rng()),
            };
            self.augment.run(&mut img, &mut mask, rng.as_mut());
        }

        Ok(to_sample(img, mask, id, &self.normalization))
    }
}

/// Builder over [`TransformPipeline`], starting from no resize and no augmentation.
#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    pipeline: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: TransformPipeline {
                target_size: None,
                augment: Augment::NONE,
                normalization: Normalization::IMAGENET,
                seed: None,
            },
        }
    }

    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.pipeline.target_size = size;
        self
    }

    pub fn augment(mut self, augment: Augment) -> Self {
        self.pipeline.augment = augment;
        self
    }

    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.pipeline.normalization = normalization;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.pipeline.seed = seed;
        self
    }

    pub fn build(self) -> TransformPipeline {
        self.pipeline
    }
}

/// FNV-1a over the sample id.
fn id_hash(id: &str) -> u64 {
    id.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn to_sample(img: RgbImage, mask: GrayImage, id: &str, norm: &Normalization) -> SegSample {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (i, px) in img.pixels().enumerate() {
        for (c, &value) in px.0.iter().enumerate() {
            image_chw[c * plane + i] = norm.apply(c, value);
        }
    }
    SegSample {
        id: id.to_string(),
        image_chw,
        mask: mask.into_raw().into_iter().map(i64::from).collect(),
        width,
        height,
    }
}
