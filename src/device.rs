//! Execution device selection for ONNX Runtime sessions.

use std::fmt;

use clap::ValueEnum;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, DirectMLExecutionProvider, ExecutionProvider,
    ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use tracing::{debug, info, warn};

/// Compute backend a session is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Device {
    /// General-purpose processor, always available.
    #[default]
    Cpu,
    /// NVIDIA CUDA
    Cuda,
    /// NVIDIA TensorRT
    #[value(name = "tensorrt")]
    TensorRt,
    /// DirectML (Windows)
    #[value(name = "directml")]
    DirectMl,
}

impl Device {
    pub const ALL: [Device; 4] = [Device::Cpu, Device::Cuda, Device::TensorRt, Device::DirectMl];

    pub const fn name(self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Cuda => "CUDA",
            Device::TensorRt => "TensorRT",
            Device::DirectMl => "DirectML",
        }
    }

    /// Asks ONNX Runtime whether this provider was compiled in and can be used.
    pub fn is_available(self) -> bool {
        let available = match self {
            Device::Cpu => return true,
            Device::Cuda => CUDAExecutionProvider::default().is_available(),
            Device::TensorRt => TensorRTExecutionProvider::default().is_available(),
            Device::DirectMl => DirectMLExecutionProvider::default().is_available(),
        };
        available.unwrap_or_else(|e| {
            debug!("availability query for {} failed: {e}", self.name());
            false
        })
    }

    pub(crate) fn provider(self, device_id: i32) -> ExecutionProviderDispatch {
        match self {
            Device::Cpu => CPUExecutionProvider::default().build(),
            Device::Cuda => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            Device::TensorRt => TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            Device::DirectMl => DirectMLExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logs which execution providers this build of ONNX Runtime can use.
pub fn log_available_devices() -> Vec<Device> {
    let available: Vec<_> = Device::ALL
        .into_iter()
        .filter(|d| d.is_available())
        .collect();
    for device in &available {
        info!("execution provider available: {device}");
    }
    available
}

/// Picks the device a session is actually created on, given the devices
/// reported by [`log_available_devices`].
///
/// Returns `None` when `requested` is unavailable and falling back is not
/// allowed.
pub fn resolve_device(
    requested: Device,
    allow_fallback: bool,
    available: &[Device],
) -> Option<Device> {
    if requested == Device::Cpu || available.contains(&requested) {
        return Some(requested);
    }
    if allow_fallback {
        warn!("{requested} execution provider is unavailable, falling back to CPU");
        Some(Device::Cpu)
    } else {
        None
    }
}
