//! Shared convolution building blocks.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Xavier-uniform initializer for `Conv2d` weights.
///
/// Transposed convs keep Burn's default init: their config only passes `fan_in`.
pub(crate) fn xavier() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Square conv with `kernel / 2` padding, so stride 1 keeps the spatial size.
pub(crate) fn conv2d<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = kernel / 2;
    Conv2dConfig::new([in_ch, out_ch], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(bias)
        .with_initializer(xavier())
        .init(device)
}

/// 1x1 classifier producing one logit map per class.
pub(crate) fn classifier<B: Backend>(
    in_ch: usize,
    num_classes: usize,
    device: &B::Device,
) -> Conv2d<B> {
    conv2d(in_ch, num_classes, 1, 1, true, device)
}

/// Conv -> BatchNorm -> ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv2d(in_ch, out_ch, 3, stride, true, device),
            bn: BatchNormConfig::new(out_ch).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.bn.forward(self.conv.forward(x)))
    }
}

/// Two stride-1 `ConvBnRelu` layers (the U-Net level block).
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    first: ConvBnRelu<B>,
    second: ConvBnRelu<B>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            first: ConvBnRelu::new(in_ch, out_ch, 1, device),
            second: ConvBnRelu::new(out_ch, out_ch, 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.second.forward(self.first.forward(x))
    }
}

/// 3x3 transposed conv, stride 2, padding 1, output padding 1: exactly doubles H and W.
pub(crate) fn upconv2x<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([in_ch, out_ch], [3, 3])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_padding_out([1, 1])
        .init(device)
}

/// Upsampling transposed conv -> BatchNorm -> ReLU.
#[derive(Module, Debug)]
pub struct DeconvBnRelu<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> DeconvBnRelu<B> {
    pub fn new(in_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            deconv: upconv2x(in_ch, out_ch, device),
            bn: BatchNormConfig::new(out_ch).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.bn.forward(self.deconv.forward(x)))
    }

    /// Upsample, then add a skip feature map of matching shape before the activation.
    pub fn forward_skip(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.bn.forward(self.deconv.forward(x)) + skip)
    }
}
