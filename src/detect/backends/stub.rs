use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceBackend;
use crate::detect::decode::ModelShape;

/// Stub backend for testing and dry runs.
///
/// Returns a programmed output tensor (all zeros by default, so nothing clears
/// the confidence threshold) and counts how often it was invoked.
pub struct StubBackend {
    shape: ModelShape,
    output: Vec<f32>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(shape: ModelShape) -> Self {
        Self {
            shape,
            output: vec![0.0; shape.output_len()],
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return `output` from every call. Length is not checked here.
    pub fn with_output(mut self, output: Vec<f32>) -> Self {
        self.output = output;
        self
    }

    /// Make every call fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared call counter; stays valid after the backend is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("stub backend configured to fail"));
        }
        if input.len() != self.shape.input_len() {
            return Err(anyhow!(
                "expected {} input floats, received {}",
                self.shape.input_len(),
                input.len()
            ));
        }
        Ok(self.output.clone())
    }
}
