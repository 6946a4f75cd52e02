pub mod config;
pub mod device;
pub mod errors;
pub mod model;
pub mod tensor;
pub mod traits;

pub mod mocks;

use image::{DynamicImage, ImageFormat, RgbaImage};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use config::{Config, ModelConfig};
pub use device::Device;
pub use errors::{AnimeGanError, Result};
pub use model::OnnxModel;
pub use tensor::{denormalize, normalize, postprocess, preprocess};
pub use traits::*;

/// Outcome of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs resize → normalize → infer → denormalize for images on disk.
pub struct Stylizer<M: StyleTransferModel> {
    model: M,
    config: Config,
}

impl<M: StyleTransferModel> Stylizer<M> {
    pub const fn new(model: M, config: Config) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Stylizes one in-memory image.
    pub fn stylize(&self, img: &DynamicImage) -> Result<RgbaImage> {
        if !self.model.is_ready() {
            return Err(AnimeGanError::NotReady);
        }
        let start = Instant::now();

        let (width, height) = self.model.input_size()?;
        let input = preprocess(&img.to_rgb8(), width, height)?;
        debug!("input tensor {:?}", input.shape());
        let output = self.model.infer(input.view())?;
        let result = postprocess(output.view())?;

        let result = if self.config.restore_size {
            tensor::resize_output(result, img.width(), img.height())
        } else {
            result
        };
        info!("inference finished in {}ms", start.elapsed().as_millis());
        Ok(result)
    }

    /// Processes `config.input`, which may be a single image or a directory.
    pub fn process_directory(&self) -> Result<ProcessingSummary> {
        let input_path = &self.config.input;
        let output_path = &self.config.output_dir;

        if !input_path.exists() {
            return Err(AnimeGanError::FileSystem {
                path: input_path.clone(),
                operation: "input existence check".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input path does not exist",
                ),
            });
        }

        fs::create_dir_all(output_path).map_err(|e| AnimeGanError::FileSystem {
            path: output_path.clone(),
            operation: "output directory creation".to_string(),
            source: e,
        })?;

        let image_files = self.collect_image_files(input_path);
        if image_files.is_empty() {
            warn!("no supported images found in {}", input_path.display());
            return Ok(ProcessingSummary::default());
        }
        info!("processing {} image(s)", image_files.len());

        let pb = ProgressBar::new(image_files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let failed = AtomicUsize::new(0);
        image_files.par_iter().for_each(|input_file| {
            if let Err(e) = self.process_single_image(input_file, output_path) {
                warn!("failed to process {}: {e}", input_file.display());
                failed.fetch_add(1, Ordering::Relaxed);
            }
            pb.inc(1);
        });
        pb.finish();

        let failed = failed.into_inner();
        let summary = ProcessingSummary {
            succeeded: image_files.len() - failed,
            failed,
        };
        info!(
            "done: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    fn collect_image_files(&self, input_path: &Path) -> Vec<PathBuf> {
        if input_path.is_file() {
            return if self.is_supported_image_format(input_path) {
                vec![input_path.to_path_buf()]
            } else {
                Vec::new()
            };
        }

        let mut image_files: Vec<_> = WalkDir::new(input_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_supported_image_format(e.path()))
            .map(|e| e.into_path())
            .collect();
        image_files.sort();
        image_files
    }

    pub fn is_supported_image_format(&self, path: &Path) -> bool {
        ImageFormat::from_path(path)
            .map(|format| format.reading_enabled())
            .unwrap_or(false)
    }

    /// Stylizes `input_file` and writes it under `output_dir`, keeping its
    /// path relative to the input root.
    pub fn process_single_image(&self, input_file: &Path, output_dir: &Path) -> Result<PathBuf> {
        let img = image::open(input_file).map_err(|e| AnimeGanError::ImageProcessing {
            path: input_file.display().to_string(),
            operation: "image loading".to_string(),
            source: Box::new(e),
        })?;

        let stylized = self.stylize(&img)?;

        let relative_path = self.get_relative_path(input_file)?;
        let output_file = output_dir
            .join(relative_path)
            .with_extension(&self.config.format);

        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| AnimeGanError::FileSystem {
                path: parent.to_path_buf(),
                operation: "output directory creation".to_string(),
                source: e,
            })?;
        }

        save_image(stylized, &output_file, self.output_format())?;
        debug!("wrote {}", output_file.display());
        Ok(output_file)
    }

    fn output_format(&self) -> ImageFormat {
        ImageFormat::from_extension(&self.config.format).unwrap_or(ImageFormat::Png)
    }

    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        let input = &self.config.input;
        if input.is_file() {
            return input_file
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| AnimeGanError::invalid_input("input file has no file name"));
        }
        input_file
            .strip_prefix(input)
            .map(|p| p.to_path_buf())
            .map_err(|_| AnimeGanError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "relative path calculation".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file is not inside the input directory",
                ),
            })
    }
}

impl Stylizer<OnnxModel> {
    /// Loads the ONNX model named by `config` and wraps it.
    pub fn with_onnx_model(config: Config) -> Result<Self> {
        let model = OnnxModel::from_config(config.model_config())?;
        if config.warmup {
            model.warm_up()?;
        }
        Ok(Self::new(model, config))
    }
}

fn save_image(image: RgbaImage, path: &Path, format: ImageFormat) -> Result<()> {
    let image = DynamicImage::ImageRgba8(image);
    // JPEG has no alpha channel.
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.into_rgb8())
    } else {
        image
    };
    image
        .save_with_format(path, format)
        .map_err(|e| AnimeGanError::ImageProcessing {
            path: path.display().to_string(),
            operation: "image saving".to_string(),
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FailingModel, IdentityModel};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn test_config(input: PathBuf, output_dir: PathBuf) -> Config {
        Config {
            input,
            output_dir,
            model_path: "model.onnx".into(),
            format: "png".to_string(),
            device: Device::Cpu,
            device_id: 0,
            no_fallback: false,
            input_name: config::DEFAULT_INPUT_NAME.to_string(),
            output_name: None,
            image_size: 512,
            restore_size: false,
            warmup: false,
            num_threads: None,
        }
    }

    #[test]
    fn test_supported_formats() {
        let stylizer = Stylizer::new(IdentityModel::square(8), test_config("in".into(), "out".into()));
        assert!(stylizer.is_supported_image_format(Path::new("a.png")));
        assert!(stylizer.is_supported_image_format(Path::new("a.JPG")));
        assert!(!stylizer.is_supported_image_format(Path::new("a.txt")));
        assert!(!stylizer.is_supported_image_format(Path::new("a")));
    }

    #[test]
    fn test_relative_path_calculation() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let subdir = input_dir.join("subdir");
        fs::create_dir_all(&subdir)?;

        let stylizer = Stylizer::new(IdentityModel::square(8), test_config(input_dir, "out".into()));
        let relative = stylizer.get_relative_path(&subdir.join("test.jpg"))?;
        assert_eq!(relative, Path::new("subdir/test.jpg"));
        assert!(stylizer.get_relative_path(Path::new("/elsewhere/x.png")).is_err());
        Ok(())
    }

    #[test]
    fn test_stylize_mid_gray_round_trip() -> Result<()> {
        let stylizer = Stylizer::new(IdentityModel::square(512), test_config("in".into(), "out".into()));
        let gray = DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 512, Rgb([128, 128, 128])));

        let result = stylizer.stylize(&gray)?;
        assert_eq!(result.dimensions(), (512, 512));
        for px in result.pixels() {
            for c in 0..3 {
                assert!((i16::from(px[c]) - 128).abs() <= 1);
            }
            assert_eq!(px[3], 255);
        }
        Ok(())
    }

    #[test]
    fn test_stylize_resizes_to_model_input() -> Result<()> {
        let mut config = test_config("in".into(), "out".into());
        let stylizer = Stylizer::new(IdentityModel::square(16), config.clone());
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 24, Rgb([10, 200, 90])));
        assert_eq!(stylizer.stylize(&img)?.dimensions(), (16, 16));

        config.restore_size = true;
        let stylizer = Stylizer::new(IdentityModel::square(16), config);
        assert_eq!(stylizer.stylize(&img)?.dimensions(), (40, 24));
        Ok(())
    }

    #[test]
    fn test_stylize_unready_model() {
        let stylizer = Stylizer::new(IdentityModel::unloaded(), test_config("in".into(), "out".into()));
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(matches!(stylizer.stylize(&img), Err(AnimeGanError::NotReady)));
        assert_eq!(stylizer.model().calls(), 0);
    }

    #[test]
    fn test_stylize_propagates_inference_error() {
        let stylizer = Stylizer::new(FailingModel, test_config("in".into(), "out".into()));
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(matches!(
            stylizer.stylize(&img),
            Err(AnimeGanError::Inference { .. })
        ));
    }

    #[test]
    fn test_save_jpeg_drops_alpha() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("out.jpg");
        save_image(RgbaImage::new(4, 4), &path, ImageFormat::Jpeg)?;
        assert!(path.exists());
        Ok(())
    }
}
