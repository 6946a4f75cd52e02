use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the style transfer pipeline.
///
/// Each variant carries the context of its failure domain (model loading,
/// inference, image I/O) so callers can match on the kind of failure instead of
/// parsing messages.
#[derive(Error, Debug)]
pub enum AnimeGanError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Model load error: {reason} ({path:?})")]
    ModelLoad {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Model is not ready: the session was never loaded, failed to load, or was released")]
    NotReady,

    #[error("Model session has already been released")]
    AlreadyReleased,

    #[error("Input shape mismatch: model expects {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<i64>, actual: Vec<usize> },

    #[error("Inference error: {operation} failed")]
    Inference {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, AnimeGanError>;

impl AnimeGanError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn inference<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Inference {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build
/// `AnimeGanError::FileSystem` directly; this is the fallback.
impl From<std::io::Error> for AnimeGanError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as inference failures rather than a separate category.
impl From<ndarray::ShapeError> for AnimeGanError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::inference("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = AnimeGanError::ShapeMismatch {
            expected: vec![1, 512, 512, 3],
            actual: vec![1, 256, 256, 3],
        };
        let message = err.to_string();
        assert!(message.contains("[1, 512, 512, 3]"));
        assert!(message.contains("[1, 256, 256, 3]"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AnimeGanError = io.into();
        assert!(matches!(err, AnimeGanError::FileSystem { .. }));
    }

    #[test]
    fn test_model_load_has_no_source_by_default() {
        use std::error::Error;

        let err = AnimeGanError::model_load("model.onnx", "file does not exist");
        assert!(err.source().is_none());
        assert!(err.to_string().contains("file does not exist"));
    }
}
