#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::decode::{ModelShape, OUTPUT_PLANES};

/// Tract-based backend for ONNX detection models.
///
/// The model takes a single NHWC float input of the configured size and
/// produces one `[1, 5, N]` output. N is read from the optimized model.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    shape: ModelShape,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let candidates = output_candidates(&model)?;
        log::info!(
            "loaded {} ({}x{} input, {} candidates)",
            model_path.display(),
            width,
            height,
            candidates
        );

        Ok(Self {
            model,
            shape: ModelShape {
                width,
                height,
                candidates,
            },
        })
    }

    fn build_input(&self, input: &[f32]) -> Result<Tensor> {
        if input.len() != self.shape.input_len() {
            return Err(anyhow!(
                "expected {} input floats, received {}",
                self.shape.input_len(),
                input.len()
            ));
        }
        let tensor = tract_ndarray::Array4::from_shape_vec(
            (1, self.shape.height as usize, self.shape.width as usize, 3),
            input.to_vec(),
        )
        .context("input tensor shape mismatch")?;
        Ok(tensor.into_tensor())
    }
}

fn output_candidates(model: &SimplePlan<TypedFact, Box<dyn TypedOp>>) -> Result<usize> {
    let fact = model
        .model()
        .output_fact(0)
        .context("model has no outputs")?;
    let dims = fact
        .shape
        .as_concrete()
        .ok_or_else(|| anyhow!("model output shape is not concrete"))?;
    match dims {
        [1, planes, n] if *planes == OUTPUT_PLANES => Ok(*n),
        other => Err(anyhow!(
            "model output shape {:?} is not [1, {}, N]",
            other,
            OUTPUT_PLANES
        )),
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let input = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(values.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0.0; self.shape.input_len()];
        self.infer(&blank).map(|_| ())
    }
}
