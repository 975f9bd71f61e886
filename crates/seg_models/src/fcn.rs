use crate::blocks::{classifier, ConvBnRelu, DeconvBnRelu};
use crate::SegmentationModel;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Channel widths of the five encoder stages; the decoder mirrors them.
pub(crate) const FCN_CHANNELS: [usize; 5] = [32, 64, 128, 256, 512];

#[derive(Debug, Clone)]
pub struct FcnConfig {
    pub num_classes: usize,
}

impl Default for FcnConfig {
    fn default() -> Self {
        Self { num_classes: 21 }
    }
}

/// Basic fully convolutional network: five stride-2 conv stages down to H/32,
/// five transposed-conv stages back up, then a 1x1 classifier.
#[derive(Module, Debug)]
pub struct Fcn<B: Backend> {
    encoder: Vec<ConvBnRelu<B>>,
    decoder: Vec<DeconvBnRelu<B>>,
    classifier: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> Fcn<B> {
    pub fn new(cfg: FcnConfig, device: &B::Device) -> Self {
        let mut encoder = Vec::with_capacity(FCN_CHANNELS.len());
        let mut in_ch = 3;
        for &out_ch in &FCN_CHANNELS {
            encoder.push(ConvBnRelu::new(in_ch, out_ch, 2, device));
            in_ch = out_ch;
        }
        // 512 -> 512 -> 256 -> 128 -> 64 -> 32
        let mut decoder = Vec::with_capacity(FCN_CHANNELS.len());
        for &out_ch in FCN_CHANNELS.iter().rev() {
            decoder.push(DeconvBnRelu::new(in_ch, out_ch, device));
            in_ch = out_ch;
        }
        Self {
            encoder,
            decoder,
            classifier: classifier(in_ch, cfg.num_classes, device),
            num_classes: cfg.num_classes,
        }
    }
}

impl<B: Backend> SegmentationModel<B> for Fcn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for stage in &self.encoder {
            x = stage.forward(x);
        }
        for stage in &self.decoder {
            x = stage.forward(x);
        }
        self.classifier.forward(x)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
