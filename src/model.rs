use std::{path::Path, time::Instant};

use ndarray::prelude::*;
use ort::{
    session::{builder::SessionBuilder, Session},
    value::{TensorRef, ValueType},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::ModelConfig,
    device::{self, Device},
    errors::{AnimeGanError, Result},
    tensor::{check_input_shape, CHANNELS},
    traits::{nhwc_spatial_size, StyleTransferModel},
};

struct LoadedSession {
    session: Session,
    input_shape: Vec<i64>,
    output_name: String,
    device: Device,
}

enum SessionState<S> {
    Unloaded,
    Ready(S),
    Released,
}

impl<S> SessionState<S> {
    fn check_loadable(&self) -> Result<()> {
        match self {
            SessionState::Unloaded => Ok(()),
            SessionState::Ready(_) => Err(AnimeGanError::invalid_input("model is already loaded")),
            SessionState::Released => Err(AnimeGanError::AlreadyReleased),
        }
    }

    fn ready(&self) -> Result<&S> {
        match self {
            SessionState::Ready(session) => Ok(session),
            _ => Err(AnimeGanError::NotReady),
        }
    }

    fn ready_mut(&mut self) -> Result<&mut S> {
        match self {
            SessionState::Ready(session) => Ok(session),
            _ => Err(AnimeGanError::NotReady),
        }
    }

    /// Takes the session out. Released stays released; unloaded stays unloaded.
    fn release(&mut self) -> Result<S> {
        match std::mem::replace(self, SessionState::Released) {
            SessionState::Ready(session) => Ok(session),
            SessionState::Released => Err(AnimeGanError::AlreadyReleased),
            SessionState::Unloaded => {
                *self = SessionState::Unloaded;
                Err(AnimeGanError::NotReady)
            }
        }
    }
}

/// Picks the output to read: the configured name if the model declares it,
/// otherwise the first declared output.
fn select_output_name(
    configured: Option<&str>,
    declared: &[&str],
) -> std::result::Result<String, String> {
    match configured {
        Some(name) if declared.contains(&name) => Ok(name.to_string()),
        Some(name) => Err(format!(
            "output '{name}' not found, model declares {declared:?}"
        )),
        None => declared
            .first()
            .map(|name| name.to_string())
            .ok_or_else(|| "model declares no outputs".to_string()),
    }
}

/// ONNX Runtime backed AnimeGAN model.
///
/// The handle starts unloaded. `load` creates the session, `release` drops it.
/// All session access goes through one mutex, so concurrent `infer` calls run
/// one after another.
pub struct OnnxModel {
    config: ModelConfig,
    state: Mutex<SessionState<LoadedSession>>,
}

impl OnnxModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SessionState::Unloaded),
        }
    }

    /// Creates the handle and loads the session in one step.
    pub fn from_config(config: ModelConfig) -> Result<Self> {
        let model = Self::new(config);
        model.load()?;
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Device the session runs on, once loaded.
    pub fn device(&self) -> Option<Device> {
        self.state.lock().ready().ok().map(|loaded| loaded.device)
    }

    /// Loads the model file. On failure the handle stays unloaded.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_loadable()?;

        let start = Instant::now();
        let loaded = self.create_session()?;
        info!(
            "loaded {} on {} in {}ms (input {:?}, output '{}')",
            self.config.model_path.display(),
            loaded.device,
            start.elapsed().as_millis(),
            loaded.input_shape,
            loaded.output_name,
        );
        *state = SessionState::Ready(loaded);
        Ok(())
    }

    fn create_session(&self) -> Result<LoadedSession> {
        let path = &self.config.model_path;
        if !path.is_file() {
            return Err(AnimeGanError::model_load(path, "model file does not exist"));
        }

        let available = device::log_available_devices();
        let device = device::resolve_device(self.config.device, self.config.allow_fallback, &available)
            .ok_or_else(|| {
                AnimeGanError::model_load(
                    path,
                    format!("{} execution provider is unavailable", self.config.device),
                )
            })?;

        let mut builder = SessionBuilder::new()
            .map_err(load_error(path, "session builder initialization"))?
            .with_execution_providers([device
                .provider(self.config.device_id)
                .error_on_failure()])
            .map_err(load_error(path, "execution provider registration"))?
            .with_memory_pattern(true)
            .map_err(load_error(path, "memory pattern setup"))?;
        if let Some(threads) = self.config.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(load_error(path, "intra-op thread setup"))?;
        }
        let session = builder
            .commit_from_file(path)
            .map_err(load_error(path, "model file parsing"))?;

        let input = session
            .inputs
            .iter()
            .find(|input| input.name == self.config.input_name)
            .ok_or_else(|| {
                let names: Vec<_> = session.inputs.iter().map(|i| i.name.as_str()).collect();
                AnimeGanError::model_load(
                    path,
                    format!(
                        "input '{}' not found, model declares {:?}",
                        self.config.input_name, names
                    ),
                )
            })?;
        let input_shape: Vec<i64> = match &input.input_type {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
            other => {
                return Err(AnimeGanError::model_load(
                    path,
                    format!("input '{}' is not a tensor: {other:?}", input.name),
                ))
            }
        };
        if input_shape.len() != 4 {
            return Err(AnimeGanError::model_load(
                path,
                format!("expected a 4D NHWC input, model declares {input_shape:?}"),
            ));
        }

        let declared: Vec<_> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        let output_name = select_output_name(self.config.output_name.as_deref(), &declared)
            .map_err(|reason| AnimeGanError::model_load(path, reason))?;

        Ok(LoadedSession {
            session,
            input_shape,
            output_name,
            device,
        })
    }

    /// Runs one zero-filled tensor through the session so the first real
    /// request doesn't pay for lazy provider initialization.
    pub fn warm_up(&self) -> Result<()> {
        let shape = self.input_shape()?;
        let (width, height) = self.input_size()?;
        let dims = warm_up_dims(&shape, width, height);
        let start = Instant::now();
        self.infer(Array4::<f32>::zeros(dims).view())?;
        debug!("warm-up finished in {}ms", start.elapsed().as_millis());
        Ok(())
    }

    /// Drops the session. Calling this twice is an error.
    pub fn release(&self) -> Result<()> {
        self.state.lock().release()?;
        info!("released session for {}", self.config.model_path.display());
        Ok(())
    }
}

/// Concrete NHWC dims for a warm-up tensor: dynamic batch becomes 1, a
/// dynamic channel dim becomes RGB.
fn warm_up_dims(shape: &[i64], width: u32, height: u32) -> [usize; 4] {
    let batch = shape.first().copied().filter(|&n| n > 0).unwrap_or(1);
    let channels = shape
        .get(3)
        .and_then(|&c| usize::try_from(c).ok())
        .filter(|&c| c > 0)
        .unwrap_or(CHANNELS);
    [batch as usize, height as usize, width as usize, channels]
}

fn load_error<'a>(path: &'a Path, reason: &'static str) -> impl FnOnce(ort::Error) -> AnimeGanError + 'a {
    move |e| AnimeGanError::ModelLoad {
        path: path.to_path_buf(),
        reason: reason.to_string(),
        source: Some(Box::new(e)),
    }
}

impl StyleTransferModel for OnnxModel {
    fn is_ready(&self) -> bool {
        self.state.lock().ready().is_ok()
    }

    fn input_shape(&self) -> Result<Vec<i64>> {
        Ok(self.state.lock().ready()?.input_shape.clone())
    }

    fn input_size(&self) -> Result<(u32, u32)> {
        let shape = self.input_shape()?;
        Ok(nhwc_spatial_size(&shape)
            .unwrap_or((self.config.image_size, self.config.image_size)))
    }

    fn infer(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut state = self.state.lock();
        let loaded = state.ready_mut()?;
        check_input_shape(&loaded.input_shape, tensor.shape())?;

        let start = Instant::now();
        let input = tensor.as_standard_layout();
        let input = TensorRef::from_array_view(input.view())
            .map_err(|e| AnimeGanError::inference("input tensor creation", e))?;
        let outputs = loaded
            .session
            .run(ort::inputs![self.config.input_name.as_str() => input])
            .map_err(|e| AnimeGanError::inference("forward pass", e))?;

        let output = outputs[loaded.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| {
                AnimeGanError::inference(format!("extracting '{}' as f32", loaded.output_name), e)
            })?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        debug!(
            "inference {:?} -> {:?} in {}ms",
            tensor.shape(),
            output.shape(),
            start.elapsed().as_millis()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn missing_model() -> OnnxModel {
        OnnxModel::new(ModelConfig::new(PathBuf::from("does/not/exist.onnx")))
    }

    #[test]
    fn test_new_model_is_not_ready() {
        let model = missing_model();
        assert!(!model.is_ready());
        assert!(model.device().is_none());
        assert!(matches!(model.input_shape(), Err(AnimeGanError::NotReady)));
        assert!(matches!(model.input_size(), Err(AnimeGanError::NotReady)));
    }

    #[test]
    fn test_infer_before_load_fails_not_ready() {
        let model = missing_model();
        let tensor = Array4::<f32>::zeros((1, 512, 512, 3));
        assert!(matches!(
            model.infer(tensor.view()),
            Err(AnimeGanError::NotReady)
        ));
    }

    #[test]
    fn test_missing_file_is_load_error_and_stays_unready() {
        let model = missing_model();
        assert!(matches!(model.load(), Err(AnimeGanError::ModelLoad { .. })));
        assert!(!model.is_ready());

        let tensor = Array4::<f32>::zeros((1, 512, 512, 3));
        assert!(matches!(
            model.infer(tensor.view()),
            Err(AnimeGanError::NotReady)
        ));
        assert!(matches!(
            OnnxModel::from_config(ModelConfig::new("does/not/exist.onnx")),
            Err(AnimeGanError::ModelLoad { .. })
        ));
    }

    #[test]
    fn test_session_state_transitions() {
        let mut state = SessionState::Unloaded;
        assert!(state.check_loadable().is_ok());
        assert!(matches!(state.ready(), Err(AnimeGanError::NotReady)));

        state = SessionState::Ready("session");
        assert!(matches!(
            state.check_loadable(),
            Err(AnimeGanError::InvalidInput { .. })
        ));
        assert_eq!(*state.ready_mut().unwrap(), "session");

        assert_eq!(state.release().unwrap(), "session");
        assert!(matches!(state.release(), Err(AnimeGanError::AlreadyReleased)));
        assert!(matches!(
            state.check_loadable(),
            Err(AnimeGanError::AlreadyReleased)
        ));
        assert!(matches!(state.ready(), Err(AnimeGanError::NotReady)));
    }

    #[test]
    fn test_release_before_load_keeps_unloaded() {
        let mut state: SessionState<()> = SessionState::Unloaded;
        assert!(matches!(state.release(), Err(AnimeGanError::NotReady)));
        assert!(state.check_loadable().is_ok());
    }

    #[test]
    fn test_warm_up_dims_fill_dynamic_axes() {
        assert_eq!(warm_up_dims(&[-1, -1, -1, -1], 512, 256), [1, 256, 512, 3]);
        assert_eq!(warm_up_dims(&[1, 512, 512, 3], 512, 512), [1, 512, 512, 3]);
        assert_eq!(warm_up_dims(&[2, -1, -1, 3], 64, 32), [2, 32, 64, 3]);
    }

    #[test]
    fn test_select_output_name() {
        let declared = ["fake:0", "generator/out:0"];
        assert_eq!(
            select_output_name(Some("generator/out:0"), &declared).unwrap(),
            "generator/out:0"
        );
        assert_eq!(select_output_name(None, &declared).unwrap(), "fake:0");

        let err = select_output_name(Some("missing"), &declared).unwrap_err();
        assert!(err.contains("missing"));
        assert!(err.contains("generator/out:0"));
        assert!(select_output_name(None, &[]).is_err());
    }

    #[test]
    fn test_release_without_session() {
        let model = missing_model();
        assert!(matches!(model.release(), Err(AnimeGanError::NotReady)));
        assert!(matches!(model.warm_up(), Err(AnimeGanError::NotReady)));
    }
}
