// ============================================================
// Layer 5 — Segmentation Model and Registry
// ============================================================
// The registered placeholder architecture:
//
//   [N, in_channels, H, W]
//        │  Conv2d 3x3, padding 1
//        ▼
//   [N, hidden_channels, H, W]
//        │  ReLU
//        ▼
//        │  Conv2d 1x1
//        ▼
//   [N, num_classes, H, W]      (logits / regression values)
//
// Output keeps the input's spatial size, so every output pixel
// lines up with the input pixel it was predicted from.
//
// get_model() is the only place names are resolved to
// architectures. Swap in a real network by registering it there.
//
// Reference: Burn Book §3 (Building Blocks)

use anyhow::Result;
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::application::config::ModelSection;

/// Name the placeholder architecture is registered under
pub const CUSTOM_MODEL: &str = "custom";

// ─── RasterModel ──────────────────────────────────────────────────────────────
/// What the inference runner needs from a model: the band count
/// it accepts and a fallible forward pass over [N, C, H, W].
pub trait RasterModel<B: Backend> {
    fn in_channels(&self) -> usize;

    fn forward_raster(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 4>>;
}

// ─── Config ───────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
#[derive(Config, Debug)]
pub struct SegmentationModelConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    #[config(default = 64)]
    pub hidden_channels: usize,
}

impl SegmentationModelConfig {
    pub fn from_section(section: &ModelSection) -> Self {
        Self::new(section.in_channels, section.num_classes)
            .with_hidden_channels(section.hidden_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationModel<B> {
        let conv_in = Conv2dConfig::new([self.in_channels, self.hidden_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv_out = Conv2dConfig::new([self.hidden_channels, self.num_classes], [1, 1])
            .init(device);

        SegmentationModel {
            conv_in,
            conv_out,
            in_channels: self.in_channels,
            num_classes: self.num_classes,
        }
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct SegmentationModel<B: Backend> {
    pub conv_in:     Conv2d<B>,
    pub conv_out:    Conv2d<B>,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl<B: Backend> SegmentationModel<B> {
    /// images: [N, in_channels, H, W] → [N, num_classes, H, W]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv_in.forward(images));
        self.conv_out.forward(x)
    }
}

impl<B: Backend> RasterModel<B> for SegmentationModel<B> {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn forward_raster(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let channels = images.dims()[1];
        anyhow::ensure!(
            channels == self.in_channels,
            "model expects {} input bands, got {}",
            self.in_channels,
            channels
        );
        Ok(self.forward(images))
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────
/// Build the architecture named in the experiment's [model] section.
pub fn get_model<B: Backend>(section: &ModelSection, device: &B::Device) -> Result<SegmentationModel<B>> {
    match section.name.as_str() {
        CUSTOM_MODEL => Ok(SegmentationModelConfig::from_section(section).init(device)),
        other        => anyhow::bail!("Model '{}' not implemented", other),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_output_keeps_spatial_size() {
        let device = Default::default();
        let model  = SegmentationModelConfig::new(3, 4).with_hidden_channels(8).init::<B>(&device);

        let out = model.forward(Tensor::<B, 4>::zeros([2, 3, 5, 7], &device));
        assert_eq!(out.dims(), [2, 4, 5, 7]);
    }

    #[test]
    fn test_registry_resolves_custom() {
        let device  = Default::default();
        let section = ModelSection { in_channels: 2, num_classes: 3, hidden_channels: 4, ..Default::default() };
        let model   = get_model::<B>(&section, &device).unwrap();
        assert_eq!(RasterModel::<B>::in_channels(&model), 2);
    }

    #[test]
    fn test_registry_rejects_unknown_names() {
        let section = ModelSection { name: "unet".to_string(), ..Default::default() };
        let err     = get_model::<B>(&section, &Default::default()).unwrap_err();
        assert_eq!(err.to_string(), "Model 'unet' not implemented");
    }

    #[test]
    fn test_band_mismatch_is_an_error() {
        let device = Default::default();
        let model  = SegmentationModelConfig::new(3, 1).with_hidden_channels(2).init::<B>(&device);
        let result = model.forward_raster(Tensor::<B, 4>::zeros([1, 2, 4, 4], &device));
        assert!(result.is_err());
    }
}
