use crate::blocks::{classifier, ConvBnRelu, DeconvBnRelu};
use crate::fcn::FCN_CHANNELS;
use crate::SegmentationModel;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::{Dropout, DropoutConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct SkipFcnConfig {
    pub num_classes: usize,
    pub dropout: f64,
}

impl Default for SkipFcnConfig {
    fn default() -> Self {
        Self {
            num_classes: 21,
            dropout: 0.2,
        }
    }
}

/// FCN variant whose decoder adds the matching encoder feature map after each
/// upsampling stage, with dropout ahead of the classifier.
#[derive(Module, Debug)]
pub struct SkipFcn<B: Backend> {
    encoder: Vec<ConvBnRelu<B>>,
    /// `decoder[i]` lands on the resolution of `encoder[3 - i]`; the last stage has no skip.
    decoder: Vec<DeconvBnRelu<B>>,
    dropout: Dropout,
    classifier: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> SkipFcn<B> {
    pub fn new(cfg: SkipFcnConfig, device: &B::Device) -> Self {
        let mut encoder = Vec::with_capacity(FCN_CHANNELS.len());
        let mut in_ch = 3;
        for &out_ch in &FCN_CHANNELS {
            encoder.push(ConvBnRelu::new(in_ch, out_ch, 2, device));
            in_ch = out_ch;
        }
        // 512 -> 256 -> 128 -> 64 -> 32 -> 32
        let mut decoder = Vec::with_capacity(FCN_CHANNELS.len());
        for &out_ch in FCN_CHANNELS[..4].iter().rev() {
            decoder.push(DeconvBnRelu::new(in_ch, out_ch, device));
            in_ch = out_ch;
        }
        decoder.push(DeconvBnRelu::new(in_ch, FCN_CHANNELS[0], device));
        Self {
            encoder,
            decoder,
            dropout: DropoutConfig::new(cfg.dropout).init(),
            classifier: classifier(FCN_CHANNELS[0], cfg.num_classes, device),
            num_classes: cfg.num_classes,
        }
    }
}

impl<B: Backend> SegmentationModel<B> for SkipFcn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut x = images;
        for stage in &self.encoder {
            x = stage.forward(x);
            skips.push(x.clone());
        }
        // The deepest map is `x` itself.
        skips.pop();
        for stage in &self.decoder {
            x = match skips.pop() {
                Some(skip) => stage.forward_skip(x, skip),
                None => stage.forward(x),
            };
        }
        self.classifier.forward(self.dropout.forward(x))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
