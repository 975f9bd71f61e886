use crate::blocks::{classifier, upconv2x, DoubleConv};
use crate::SegmentationModel;
use burn::module::Module;
use burn::nn::conv::{Conv2d, ConvTranspose2d};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct UNetConfig {
    pub num_classes: usize,
    /// Channels of the first level; each deeper level doubles it.
    pub base_channels: usize,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            num_classes: 21,
            base_channels: 64,
        }
    }
}

#[derive(Module, Debug)]
pub struct UpLevel<B: Backend> {
    up: ConvTranspose2d<B>,
    conv: DoubleConv<B>,
}

/// U-Net: four down levels (double conv + 2x2 max pool), a bottleneck, and four
/// up levels that concatenate the matching down-level features before a double conv.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    down: Vec<DoubleConv<B>>,
    pool: MaxPool2d,
    bottleneck: DoubleConv<B>,
    up: Vec<UpLevel<B>>,
    classifier: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> UNet<B> {
    pub fn new(cfg: UNetConfig, device: &B::Device) -> Self {
        let base = cfg.base_channels.max(1);
        let widths = [base, base * 2, base * 4, base * 8];
        let mut down = Vec::with_capacity(widths.len());
        let mut in_ch = 3;
        for &w in &widths {
            down.push(DoubleConv::new(in_ch, w, device));
            in_ch = w;
        }
        let bottleneck = DoubleConv::new(in_ch, base * 16, device);
        in_ch = base * 16;
        let mut up = Vec::with_capacity(widths.len());
        for &w in widths.iter().rev() {
            up.push(UpLevel {
                up: upconv2x(in_ch, w, device),
                conv: DoubleConv::new(w * 2, w, device),
            });
            in_ch = w;
        }
        Self {
            down,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            up,
            classifier: classifier(base, cfg.num_classes, device),
            num_classes: cfg.num_classes,
        }
    }
}

impl<B: Backend> SegmentationModel<B> for UNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = images;
        for level in &self.down {
            let features = level.forward(x);
            x = self.pool.forward(features.clone());
            skips.push(features);
        }
        x = self.bottleneck.forward(x);
        for (level, skip) in self.up.iter().zip(skips.into_iter().rev()) {
            let up = level.up.forward(x);
            x = level.conv.forward(Tensor::cat(vec![up, skip], 1));
        }
        self.classifier.forward(x)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
