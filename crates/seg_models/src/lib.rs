//! Burn semantic-segmentation networks.
//!
//! Every model maps a normalized image batch `[B, 3, H, W]` to per-class logits
//! `[B, num_classes, H, W]`. Inputs must have sides divisible by 32 (the deepest
//! encoder stride).
//! - `Fcn`: strided conv encoder, transposed-conv decoder.
//! - `UNet`: double-conv levels with concatenated skips.
//! - `ResNetFcn`: ResNet-18/34 encoder with additive decoder skips; encoder can be
//!   loaded from a record file and frozen.
//! - `SkipFcn`: the FCN with additive skips and dropout (`new_arch` in configs).
//!
//! These are pure Burn Modules; the `training` crate drives them through
//! `SegmentationModel`.

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod blocks;
pub mod fcn;
pub mod resnet;
pub mod skip_fcn;
pub mod unet;

pub use fcn::{Fcn, FcnConfig};
pub use resnet::{ResNetEncoder, ResNetFcn, ResNetFcnConfig};
pub use skip_fcn::{SkipFcn, SkipFcnConfig};
pub use unet::{UNet, UNetConfig};

/// Largest downsampling factor of any model; input sides must be multiples of it.
pub const INPUT_STRIDE: usize = 32;

/// Common surface the trainer needs from a segmentation network.
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// Per-class logits `[B, num_classes, H, W]`.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    fn num_classes(&self) -> usize;

    /// Whether the model has a pretrained-style encoder that can be frozen.
    fn supports_freeze(&self) -> bool {
        false
    }

    /// Stop gradients through the encoder. Models without one are returned unchanged.
    fn freeze_encoder(self) -> Self
    where
        Self: Sized,
    {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Fcn,
    Unet,
    Resnet,
    NewArch,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Fcn,
        ModelKind::Unet,
        ModelKind::Resnet,
        ModelKind::NewArch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Fcn => "fcn",
            ModelKind::Unet => "unet",
            ModelKind::Resnet => "resnet",
            ModelKind::NewArch => "new_arch",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown model '{0}' (expected fcn, unet, resnet or new_arch)")]
pub struct UnknownModelKind(pub String);

impl FromStr for ModelKind {
    type Err = UnknownModelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fcn" => Ok(ModelKind::Fcn),
            "unet" | "u_net" => Ok(ModelKind::Unet),
            "resnet" => Ok(ModelKind::Resnet),
            "new_arch" | "skip_fcn" => Ok(ModelKind::NewArch),
            _ => Err(UnknownModelKind(s.to_string())),
        }
    }
}

pub mod prelude {
    pub use super::{
        Fcn, FcnConfig, ModelKind, ResNetEncoder, ResNetFcn, ResNetFcnConfig, SegmentationModel,
        SkipFcn, SkipFcnConfig, UNet, UNetConfig,
    };
}

#[cfg(test)]
mod kind_tests {
    use super::ModelKind;

    #[test]
    fn parses_config_names() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
        assert_eq!("U-Net".parse::<ModelKind>().unwrap(), ModelKind::Unet);
        assert!("segformer".parse::<ModelKind>().is_err());
    }
}
