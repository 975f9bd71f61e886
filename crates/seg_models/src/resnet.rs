//! ResNet-18/34 encoder with a transposed-conv decoder and additive skips.

use crate::blocks::{classifier, conv2d, DeconvBnRelu};
use crate::SegmentationModel;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

/// Basic blocks per stage for the supported depths.
pub fn blocks_per_stage(depth: usize) -> Option<[usize; 4]> {
    match depth {
        18 => Some([2, 2, 2, 2]),
        34 => Some([3, 4, 6, 3]),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ResNetFcnConfig {
    pub num_classes: usize,
    /// 18 or 34; anything else falls back to 18.
    pub depth: usize,
}

impl Default for ResNetFcnConfig {
    fn default() -> Self {
        Self {
            num_classes: 21,
            depth: 18,
        }
    }
}

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_ch != out_ch).then(|| Downsample {
            conv: conv2d(in_ch, out_ch, 1, stride, false, device),
            bn: BatchNormConfig::new(out_ch).init(device),
        });
        Self {
            conv1: conv2d(in_ch, out_ch, 3, stride, false, device),
            bn1: BatchNormConfig::new(out_ch).init(device),
            conv2: conv2d(out_ch, out_ch, 3, 1, false, device),
            bn2: BatchNormConfig::new(out_ch).init(device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.bn.forward(ds.conv.forward(x.clone())),
            None => x.clone(),
        };
        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        relu(out + identity)
    }
}

fn make_stage<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    count: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    let mut stage = Vec::with_capacity(count);
    stage.push(BasicBlock::new(in_ch, out_ch, stride, device));
    for _ in 1..count {
        stage.push(BasicBlock::new(out_ch, out_ch, 1, device));
    }
    stage
}

/// Feature maps from each encoder level, shallowest first.
pub struct EncoderFeatures<B: Backend> {
    /// Stem output, 64 channels at H/2.
    pub stem: Tensor<B, 4>,
    /// Stage outputs at H/4, H/8, H/16, H/32.
    pub stages: [Tensor<B, 4>; 4],
}

#[derive(Module, Debug)]
pub struct ResNetEncoder<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNetEncoder<B> {
    pub fn new(depth: usize, device: &B::Device) -> Self {
        let [n1, n2, n3, n4] = blocks_per_stage(depth).unwrap_or([2, 2, 2, 2]);
        let [w1, w2, w3, w4] = STAGE_CHANNELS;
        Self {
            conv1: conv2d(3, w1, 7, 2, false, device),
            bn1: BatchNormConfig::new(w1).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: make_stage(w1, w1, n1, 1, device),
            layer2: make_stage(w1, w2, n2, 2, device),
            layer3: make_stage(w2, w3, n3, 2, device),
            layer4: make_stage(w3, w4, n4, 2, device),
        }
    }

    pub fn forward_features(&self, images: Tensor<B, 4>) -> EncoderFeatures<B> {
        let stem = relu(self.bn1.forward(self.conv1.forward(images)));
        let run = |blocks: &[BasicBlock<B>], x: Tensor<B, 4>| {
            blocks.iter().fold(x, |x, block| block.forward(x))
        };
        let c1 = run(&self.layer1, self.maxpool.forward(stem.clone()));
        let c2 = run(&self.layer2, c1.clone());
        let c3 = run(&self.layer3, c2.clone());
        let c4 = run(&self.layer4, c3.clone());
        EncoderFeatures {
            stem,
            stages: [c1, c2, c3, c4],
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNetFcn<B: Backend> {
    encoder: ResNetEncoder<B>,
    /// H/32 -> H/16 -> H/8 -> H/4 -> H/2, each adding the encoder map at that scale.
    decoder: Vec<DeconvBnRelu<B>>,
    /// H/2 -> H, no skip.
    head_up: DeconvBnRelu<B>,
    classifier: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> ResNetFcn<B> {
    pub fn new(cfg: ResNetFcnConfig, device: &B::Device) -> Self {
        // 512 -> 256 -> 128 -> 64 -> 64
        let widths = [256, 128, 64, 64];
        let mut decoder = Vec::with_capacity(widths.len());
        let mut in_ch = STAGE_CHANNELS[3];
        for &w in &widths {
            decoder.push(DeconvBnRelu::new(in_ch, w, device));
            in_ch = w;
        }
        Self {
            encoder: ResNetEncoder::new(cfg.depth, device),
            decoder,
            head_up: DeconvBnRelu::new(in_ch, 32, device),
            classifier: classifier(32, cfg.num_classes, device),
            num_classes: cfg.num_classes,
        }
    }

    pub fn encoder(&self) -> &ResNetEncoder<B> {
        &self.encoder
    }

    /// Replace the encoder parameters with a record previously written by `save_encoder`.
    pub fn load_encoder<P: AsRef<Path>>(
        mut self,
        path: P,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.encoder = self.encoder.load_file(path.as_ref(), &recorder, device)?;
        Ok(self)
    }

    pub fn save_encoder<P: AsRef<Path>>(&self, path: P) -> Result<(), RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.encoder.clone().save_file(path.as_ref(), &recorder)
    }
}

impl<B: Backend> SegmentationModel<B> for ResNetFcn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let EncoderFeatures { stem, stages } = self.encoder.forward_features(images);
        let [c1, c2, c3, c4] = stages;
        let mut x = c4;
        for (stage, skip) in self.decoder.iter().zip([c3, c2, c1, stem]) {
            x = stage.forward_skip(x, skip);
        }
        self.classifier.forward(self.head_up.forward(x))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn supports_freeze(&self) -> bool {
        true
    }

    fn freeze_encoder(mut self) -> Self {
        self.encoder = self.encoder.no_grad();
        self
    }
}
