use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::{
    error::{BoxError, ClassifierError},
    pipeline::classifier::{GestureModel, GestureModelLoader},
};

fn backend(err: impl Into<BoxError>) -> ClassifierError {
    ClassifierError::Backend(err.into())
}

/// Gesture classifier taking a (1, 63) float input and producing one row of
/// class scores.
pub struct OrtGestureModel {
    session: Session,
}

impl GestureModel for OrtGestureModel {
    fn infer(
        &mut self,
        features: &[f32],
        num_classes: usize,
    ) -> Result<Vec<Vec<f32>>, ClassifierError> {
        let input = Array2::<f32>::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(backend)?;
        let tensor = Tensor::from_array(input).map_err(backend)?;
        let outputs = self.session.run(ort::inputs![tensor]).map_err(backend)?;
        if outputs.len() < 1 {
            return Err(ClassifierError::EmptyOutput);
        }

        let scores: Vec<f32> = outputs[0]
            .try_extract_array::<f32>()
            .map_err(backend)?
            .iter()
            .copied()
            .collect();
        if scores.is_empty() {
            return Err(ClassifierError::EmptyOutput);
        }
        if num_classes == 0 || scores.len() % num_classes != 0 {
            return Err(ClassifierError::ClassCount {
                expected: num_classes,
                got: scores.len(),
            });
        }

        Ok(scores.chunks(num_classes).map(<[f32]>::to_vec).collect())
    }
}

/// Builds [`OrtGestureModel`]s from in-memory ONNX bytes.
pub struct OrtModelLoader {
    intra_threads: usize,
}

impl OrtModelLoader {
    pub fn with_intra_threads(threads: usize) -> Self {
        Self {
            intra_threads: threads.max(1),
        }
    }
}

impl GestureModelLoader for OrtModelLoader {
    type Model = OrtGestureModel;

    fn load(&self, model_bytes: &[u8]) -> Result<Self::Model, ClassifierError> {
        let session = Session::builder()
            .map_err(backend)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(backend)?
            .with_intra_threads(self.intra_threads)
            .map_err(backend)?
            .commit_from_memory(model_bytes)
            .map_err(backend)?;
        Ok(OrtGestureModel { session })
    }
}
