use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ndarray::prelude::*;

use crate::errors::{AnimeGanError, Result};
use crate::tensor::check_input_shape;
use crate::traits::{nhwc_spatial_size, StyleTransferModel};

/// Test double that returns its input unchanged.
#[derive(Debug)]
pub struct IdentityModel {
    pub input_shape: Vec<i64>,
    pub fallback_size: u32,
    ready: AtomicBool,
    calls: AtomicUsize,
}

impl IdentityModel {
    pub fn new(input_shape: Vec<i64>) -> Self {
        Self {
            input_shape,
            fallback_size: 512,
            ready: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model expecting `[1, size, size, 3]`.
    pub fn square(size: i64) -> Self {
        Self::new(vec![1, size, size, 3])
    }

    /// A handle whose session never loaded.
    pub fn unloaded() -> Self {
        let model = Self::square(512);
        model.ready.store(false, Ordering::SeqCst);
        model
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StyleTransferModel for IdentityModel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn input_shape(&self) -> Result<Vec<i64>> {
        if !self.is_ready() {
            return Err(AnimeGanError::NotReady);
        }
        Ok(self.input_shape.clone())
    }

    fn input_size(&self) -> Result<(u32, u32)> {
        let shape = self.input_shape()?;
        Ok(nhwc_spatial_size(&shape).unwrap_or((self.fallback_size, self.fallback_size)))
    }

    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        if !self.is_ready() {
            return Err(AnimeGanError::NotReady);
        }
        check_input_shape(&self.input_shape, tensor.shape())?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tensor.to_owned())
    }
}

/// Test double whose forward pass always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingModel;

impl StyleTransferModel for FailingModel {
    fn is_ready(&self) -> bool {
        true
    }

    fn input_shape(&self) -> Result<Vec<i64>> {
        Ok(vec![1, -1, -1, 3])
    }

    fn input_size(&self) -> Result<(u32, u32)> {
        Ok((64, 64))
    }

    fn infer(&self, _tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        Err(AnimeGanError::inference(
            "forward pass",
            std::io::Error::other("simulated execution failure"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_model_returns_input() -> Result<()> {
        let model = IdentityModel::square(4);
        let input = Array4::from_elem((1, 4, 4, 3), 0.25f32);
        let output = model.infer(input.view())?;
        assert_eq!(output, input);
        assert_eq!(model.calls(), 1);
        assert_eq!(model.input_size()?, (4, 4));
        Ok(())
    }

    #[test]
    fn test_identity_model_checks_shape() {
        let model = IdentityModel::square(512);
        let input = Array4::<f32>::zeros((1, 256, 256, 3));
        assert!(matches!(
            model.infer(input.view()),
            Err(AnimeGanError::ShapeMismatch { .. })
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_dynamic_shape_uses_fallback_size() -> Result<()> {
        let model = IdentityModel::new(vec![1, -1, -1, 3]);
        assert_eq!(model.input_size()?, (512, 512));
        Ok(())
    }

    #[test]
    fn test_unloaded_model() {
        let model = IdentityModel::unloaded();
        assert!(!model.is_ready());
        let input = Array4::<f32>::zeros((1, 512, 512, 3));
        assert!(matches!(model.infer(input.view()), Err(AnimeGanError::NotReady)));
    }
}
