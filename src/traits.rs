use crate::errors::Result;
use ndarray::prelude::*;

/// Abstraction over a loaded style-transfer network.
///
/// `Stylizer` depends on this trait rather than on ONNX Runtime directly, so the
/// pipeline can be exercised with test doubles.
pub trait StyleTransferModel: Send + Sync {
    /// Whether a session is loaded and usable.
    fn is_ready(&self) -> bool;

    /// Declared input shape; dynamic dimensions are negative.
    fn input_shape(&self) -> Result<Vec<i64>>;

    /// `(width, height)` images are resized to before inference.
    fn input_size(&self) -> Result<(u32, u32)>;

    /// Runs the network on a `[1, H, W, 3]` tensor. Blocks until done.
    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// Spatial `(width, height)` of an NHWC shape, or `None` if either is dynamic.
pub fn nhwc_spatial_size(shape: &[i64]) -> Option<(u32, u32)> {
    match shape {
        [_, h, w, _] if *h > 0 && *w > 0 => Some((u32::try_from(*w).ok()?, u32::try_from(*h).ok()?)),
        _ => None,
    }
}
