pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::InferenceBackend;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Names accepted by `build_backend`.
pub const BACKEND_NAMES: &[&str] = &["stub", "tract"];

/// Construct the backend named in the detector settings.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn InferenceBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new(settings.shape()))),
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
                let mut backend =
                    TractBackend::new(path, settings.input_width, settings.input_height)?;
                backend.warm_up()?;
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!("tract backend requires the backend-tract feature"))
            }
        }
        other => Err(anyhow!(
            "unknown detector backend '{}': expected one of {:?}",
            other,
            BACKEND_NAMES
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stub_with_configured_shape() {
        let settings = DetectorSettings {
            input_width: 32,
            input_height: 16,
            candidates: 10,
            ..DetectorSettings::default()
        };
        let backend = build_backend(&settings).unwrap();
        assert_eq!(backend.name(), "stub");
        assert_eq!(backend.shape(), settings.shape());
    }

    #[test]
    fn rejects_unknown_backend() {
        let settings = DetectorSettings {
            backend: "cuda".to_string(),
            ..DetectorSettings::default()
        };
        assert!(build_backend(&settings).is_err());
    }
}
