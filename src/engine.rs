use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::types::DetectorConfig;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("could not load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("could not write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("unexpected model output shape: {0}")]
    InvalidOutputShape(String),

    #[error("Preprocess error: {0}")]
    Preprocess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// ONNX Runtime session shared behind a mutex so detection can run through `&self`.
pub struct OrtSession {
    session: Mutex<Session>,
    input_name: String,
}

impl OrtSession {
    pub fn from_det_config(cfg: &DetectorConfig) -> Result<Self, EngineError> {
        Self::from_path(&cfg.model_path, cfg.intra_threads)
    }

    fn from_path(model_path: &Path, intra_threads: usize) -> Result<Self, EngineError> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;

        if intra_threads > 0 {
            builder = builder.with_intra_threads(intra_threads)?;
        }

        let session = builder.commit_from_file(model_path)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| EngineError::InvalidOutputShape("model declares no inputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    /// Run the model on an NCHW tensor, returning the first output's shape and data.
    pub fn run(&self, input: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>), EngineError> {
        let (n, c, h, w) = input.dim();
        let shape = [n, c, h, w];
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EngineError::DetectorUnavailable("ONNX session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;

        let first = outputs
            .iter()
            .next()
            .ok_or_else(|| EngineError::InvalidOutputShape("model produced no outputs".to_string()))?
            .1;
        let (out_shape, out_data) = first.try_extract_tensor::<f32>()?;
        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }

    /// Custom metadata value stored in the model (e.g. Ultralytics `names`).
    pub fn metadata_value(&self, key: &str) -> Option<String> {
        let session = self.session.lock().ok()?;
        let meta = session.metadata().ok()?;
        meta.custom(key).ok()?
    }

    /// A session that has been poisoned by a panicking run is no longer usable.
    pub fn is_usable(&self) -> bool {
        !self.session.is_poisoned()
    }
}
