use anyhow::Result;

use super::decode::ModelShape;

/// Inference backend trait.
///
/// A backend wraps one loaded model with a fixed tensor shape. It receives the
/// preprocessed input tensor (`shape().input_len()` floats in [0, 1], pixel rows
/// top to bottom, RGB interleaved) and returns the raw `[1, 5, N]` output.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Tensor shape contract of the loaded model.
    fn shape(&self) -> ModelShape;

    /// Run the model once.
    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
