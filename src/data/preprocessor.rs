// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Brings every training image to the same shape and scale
// before it reaches the model.
//
// Steps (applied in order):
//   1. Resize to the configured (height, width), nearest-neighbour
//   2. Normalise each channel: (x - mean) / std
//      (ImageNet statistics for 3-channel inputs, no-op otherwise)
//
// Targets only go through step 1. Nearest-neighbour keeps class
// labels intact; interpolating a mask would invent classes at
// the boundaries.
//
// Horizontal flipping is an augmentation and happens per batch
// (see batcher.rs); the helper lives here with the other pixel
// operations.
//
// All buffers are channel-major: [channels, height, width].

/// ImageNet per-channel statistics for inputs scaled to [0, 1]
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD:  [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std:  Vec<f32>,
}

impl Normalization {
    pub fn imagenet() -> Self {
        Self { mean: IMAGENET_MEAN.to_vec(), std: IMAGENET_STD.to_vec() }
    }

    /// Default statistics for a channel count, if any apply
    pub fn for_channels(channels: usize) -> Option<Self> {
        (channels == 3).then(Self::imagenet)
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    height:        usize,
    width:         usize,
    normalization: Option<Normalization>,
}

impl Preprocessor {
    pub fn new(height: usize, width: usize, normalization: Option<Normalization>) -> Self {
        Self { height, width, normalization }
    }

    pub fn output_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Resize then normalise an input image
    pub fn prepare_image(&self, data: &[f32], channels: usize, height: usize, width: usize) -> Vec<f32> {
        let mut out = resize_nearest(data, channels, height, width, self.height, self.width);

        if let Some(norm) = &self.normalization {
            // Statistics for a different channel count do not apply
            if norm.mean.len() == channels && norm.std.len() == channels {
                let plane = self.height * self.width;
                for (c, chunk) in out.chunks_exact_mut(plane).enumerate() {
                    let (mean, std) = (norm.mean[c], norm.std[c]);
                    chunk.iter_mut().for_each(|v| *v = (*v - mean) / std);
                }
            }
        }
        out
    }

    /// Resize a target mask without touching its values
    pub fn prepare_target(&self, data: &[f32], channels: usize, height: usize, width: usize) -> Vec<f32> {
        resize_nearest(data, channels, height, width, self.height, self.width)
    }
}

/// Nearest-neighbour resize of a channel-major buffer.
pub fn resize_nearest(
    data:     &[f32],
    channels: usize,
    src_h:    usize,
    src_w:    usize,
    dst_h:    usize,
    dst_w:    usize,
) -> Vec<f32> {
    if src_h == dst_h && src_w == dst_w {
        return data.to_vec();
    }

    let src_plane = src_h * src_w;
    let mut out   = Vec::with_capacity(channels * dst_h * dst_w);

    for c in 0..channels {
        let plane = &data[c * src_plane..(c + 1) * src_plane];
        for y in 0..dst_h {
            // Sample at the centre of each destination pixel
            let sy = (((y as f64 + 0.5) * src_h as f64 / dst_h as f64) as usize).min(src_h - 1);
            for x in 0..dst_w {
                let sx = (((x as f64 + 0.5) * src_w as f64 / dst_w as f64) as usize).min(src_w - 1);
                out.push(plane[sy * src_w + sx]);
            }
        }
    }
    out
}

/// Mirror every row of every channel
pub fn flip_horizontal(data: &[f32], channels: usize, height: usize, width: usize) -> Vec<f32> {
    let mut out = data[..channels * height * width].to_vec();
    for row in out.chunks_exact_mut(width) {
        row.reverse();
    }
    out
}
