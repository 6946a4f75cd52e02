use clap::Parser;
use image::ImageFormat;
use std::path::PathBuf;

use crate::device::Device;

/// Input node name of the AnimeGANv3 ONNX exports.
pub const DEFAULT_INPUT_NAME: &str = "AnimeGANv3_input:0";

/// Spatial size used when the model declares dynamic dimensions.
pub const DEFAULT_IMAGE_SIZE: u32 = 512;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images to stylize
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(long, value_enum, default_value_t = Device::Cpu)]
    pub device: Device,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Fail instead of falling back to CPU when the device is unavailable
    #[arg(long)]
    pub no_fallback: bool,

    #[arg(long, default_value = DEFAULT_INPUT_NAME)]
    pub input_name: String,

    /// Output tensor to read; the first declared output when omitted
    #[arg(long)]
    pub output_name: Option<String>,

    #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
    pub image_size: u32,

    /// Resize results back to the source image size
    #[arg(long)]
    pub restore_size: bool,

    /// Run one dummy inference right after loading the model
    #[arg(long)]
    pub warmup: bool,

    #[arg(short, long)]
    pub num_threads: Option<usize>,
}

impl Config {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_path: self.model_path.clone(),
            device: self.device,
            device_id: self.device_id,
            allow_fallback: !self.no_fallback,
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            image_size: self.image_size,
            intra_threads: None,
        }
    }
}

/// Everything needed to create an inference session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub device: Device,
    pub device_id: i32,
    pub allow_fallback: bool,
    pub input_name: String,
    pub output_name: Option<String>,
    pub image_size: u32,
    pub intra_threads: Option<usize>,
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            device: Device::Cpu,
            device_id: 0,
            allow_fallback: true,
            input_name: DEFAULT_INPUT_NAME.to_string(),
            output_name: None,
            image_size: DEFAULT_IMAGE_SIZE,
            intra_threads: None,
        }
    }

    pub fn with_device(mut self, device: Device, device_id: i32) -> Self {
        self.device = device;
        self.device_id = device_id;
        self
    }

    pub fn with_input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = name.into();
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }
}

/// Accepts an output extension only if this build can encode it.
fn check_format(s: &str) -> Result<String, String> {
    match ImageFormat::from_extension(s) {
        Some(format) if format.writing_enabled() => Ok(s.to_string()),
        _ => {
            let writable: Vec<_> = ImageFormat::all()
                .filter(|format| format.writing_enabled())
                .flat_map(|format| format.extensions_str().iter().copied())
                .collect();
            Err(format!("cannot write `{s}` images; writable extensions: {}", writable.join(", ")))
        }
    }
}
