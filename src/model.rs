use crate::{
    config::{ModelConfig, Validatable},
    decoder::PixelTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub class_id: usize,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    Runtime(String),
    #[error("Model produced no class scores")]
    EmptyOutput,
    #[error("Model session mutex poisoned")]
    Poisoned,
}

impl From<ort::Error> for InferenceError {
    fn from(err: ort::Error) -> Self {
        InferenceError::Runtime(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Invalid model configuration: {0}")]
    Config(String),
    #[error("Failed to load ONNX model: {0}")]
    Ort(String),
    #[error("Model has no outputs")]
    NoOutputs,
}

/// Opaque classification model: pixel tensor in, best class out.
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, input: &PixelTensor) -> Result<Classification, InferenceError>;
}

/// Arg-max over a score vector. The first maximum wins on ties.
pub fn top_class(scores: &[f32]) -> Option<Classification> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .map(|(class_id, confidence)| Classification {
            class_id,
            confidence,
        })
}

/// Scores of the first batch entry of a flat output buffer. Rank-1 outputs
/// have no batch axis and are returned whole.
fn first_row<'a>(shape: &[i64], data: &'a [f32]) -> &'a [f32] {
    if shape.len() < 2 {
        return data;
    }
    let batch = shape[0].max(1) as usize;
    let row_len = data.len() / batch;
    &data[..row_len]
}

pub struct OrtClassifier {
    session: Mutex<Session>,
    output_name: String,
}

impl OrtClassifier {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        model_config.validate().map_err(ModelLoadError::Config)?;

        let load_err = |e: ort::Error| ModelLoadError::Ort(e.to_string());
        let session = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelLoadError::Ort(e.to_string()))?
            .commit_from_file(model_config.get_path())
            .map_err(load_err)?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or(ModelLoadError::NoOutputs)?;

        tracing::info!(
            model = %model_config.get_path().display(),
            output = %output_name,
            "Loaded ONNX classifier"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl Classifier for OrtClassifier {
    fn classify(&self, input: &PixelTensor) -> Result<Classification, InferenceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Poisoned)?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        top_class(first_row(shape, data)).ok_or(InferenceError::EmptyOutput)
    }
}
