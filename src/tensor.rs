//! Conversion between 8-bit RGB images and the NHWC float tensors AnimeGAN
//! models consume and produce.

use image::{imageops, imageops::FilterType, ImageBuffer, RgbImage, Rgba, RgbaImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{AnimeGanError, Result};

/// Number of color channels in model tensors.
pub const CHANNELS: usize = 3;

const HALF_RANGE: f32 = 127.5;

/// Maps an 8-bit channel value to `[-1.0, 1.0]`.
#[inline]
pub fn normalize(raw: u8) -> f32 {
    f32::from(raw) / HALF_RANGE - 1.0
}

/// Maps a model output value back to 8 bits.
///
/// Values outside `[-1.0, 1.0]` are clamped before narrowing; the fractional
/// part is truncated. NaN becomes 0.
#[inline]
pub fn denormalize(value: f32) -> u8 {
    num_traits::clamp((value + 1.0) * HALF_RANGE, 0.0, 255.0) as u8
}

/// Builds an RGB image from a raw interleaved buffer.
pub fn rgb_image_from_raw(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Result<RgbImage> {
    if channels as usize != CHANNELS {
        return Err(AnimeGanError::invalid_input(format!(
            "expected {CHANNELS} channels, got {channels}"
        )));
    }
    check_dimensions("image", width, height)?;

    let expected = width as usize * height as usize * CHANNELS;
    if data.len() != expected {
        return Err(AnimeGanError::invalid_input(format!(
            "buffer holds {} bytes, {width}x{height}x{CHANNELS} needs {expected}",
            data.len()
        )));
    }

    ImageBuffer::from_raw(width, height, data)
        .ok_or_else(|| AnimeGanError::invalid_input("buffer does not match image dimensions"))
}

/// Resizes `image` to the target size and converts it into a `[1, H, W, 3]`
/// tensor with values in `[-1.0, 1.0]`.
pub fn preprocess(image: &RgbImage, target_width: u32, target_height: u32) -> Result<Array4<f32>> {
    check_dimensions("image", image.width(), image.height())?;
    check_dimensions("target", target_width, target_height)?;

    let resized;
    let image = if image.dimensions() == (target_width, target_height) {
        image
    } else {
        resized = imageops::resize(image, target_width, target_height, FilterType::Triangle);
        &resized
    };

    // (C, H, W) view over the interleaved buffer, reordered to (1, H, W, C).
    let tensor = image
        .as_ndarray3()
        .permuted_axes([1, 2, 0])
        .insert_axis(Axis(0))
        .mapv(normalize);

    Ok(tensor.as_standard_layout().into_owned())
}

/// Converts a `[1, H, W, 3]` tensor into an opaque RGBA image.
pub fn postprocess(tensor: ArrayView4<f32>) -> Result<RgbaImage> {
    let (batch, height, width, channels) = tensor.dim();
    if batch != 1 || channels != CHANNELS {
        return Err(AnimeGanError::invalid_input(format!(
            "expected output shape [1, H, W, {CHANNELS}], got {:?}",
            tensor.shape()
        )));
    }
    let width = u32::try_from(width)
        .map_err(|_| AnimeGanError::invalid_input("output width exceeds u32"))?;
    let height = u32::try_from(height)
        .map_err(|_| AnimeGanError::invalid_input("output height exceeds u32"))?;
    check_dimensions("output", width, height)?;

    let pixels = tensor.index_axis(Axis(0), 0);
    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let px = pixels.slice(s![y as usize, x as usize, ..]);
        Rgba([
            denormalize(px[0]),
            denormalize(px[1]),
            denormalize(px[2]),
            u8::MAX,
        ])
    }))
}

/// Resizes an RGBA result back to the given size; same-size input is copied.
pub fn resize_output(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Triangle)
}

fn check_dimensions(what: &str, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(AnimeGanError::invalid_input(format!(
            "{what} dimensions must be positive, got {width}x{height}"
        )));
    }
    Ok(())
}

/// Checks a tensor shape against a model's declared input shape.
///
/// Declared dimensions that are negative (dynamic) match any size.
pub fn check_input_shape(expected: &[i64], actual: &[usize]) -> Result<()> {
    let matches = expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(&e, &a)| e < 0 || e as usize == a);
    if matches {
        Ok(())
    } else {
        Err(AnimeGanError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
