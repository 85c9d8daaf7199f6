//! OCR strategy over rendered PDF pages.
//!
//! Uses the ocrs engine with RTen model files. The models are distributed
//! separately; when they are absent the error reports "not installed" so the auto
//! chain can distinguish a missing engine from a genuine processing failure.

use std::path::PathBuf;

use crate::error::{AgentError, Result};

/// Locations of the ocrs detection and recognition models.
#[derive(Debug, Clone)]
pub struct OcrModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl Default for OcrModelPaths {
    fn default() -> Self {
        // The conventional cache location used by the ocrs CLI.
        let base = dirs_cache().join("ocrs");
        Self {
            detection: base.join("text-detection.rten"),
            recognition: base.join("text-recognition.rten"),
        }
    }
}

fn dirs_cache() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
}

/// OCR engine wrapper holding loaded models.
pub(crate) struct OcrRunner {
    engine: ocrs::OcrEngine,
}

impl OcrRunner {
    /// Loads the models, reporting missing files as the "not installed" error class.
    pub(crate) fn load(paths: &OcrModelPaths) -> Result<Self> {
        if !paths.detection.exists() || !paths.recognition.exists() {
            return Err(AgentError::Ocr {
                message: format!(
                    "OCR models not installed (expected {} and {})",
                    paths.detection.display(),
                    paths.recognition.display()
                ),
                pdf_path: None,
                not_installed: true,
            });
        }

        let detection_model = rten::Model::load_file(&paths.detection).map_err(|e| AgentError::Ocr {
            message: format!("failed to load detection model: {e}"),
            pdf_path: None,
            not_installed: true,
        })?;
        let recognition_model =
            rten::Model::load_file(&paths.recognition).map_err(|e| AgentError::Ocr {
                message: format!("failed to load recognition model: {e}"),
                pdf_path: None,
                not_installed: true,
            })?;

        let engine = ocrs::OcrEngine::new(ocrs::OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| AgentError::Ocr {
            message: format!("failed to initialize OCR engine: {e}"),
            pdf_path: None,
            not_installed: false,
        })?;

        Ok(Self { engine })
    }

    /// Recognizes text on one rendered page.
    pub(crate) fn recognize_page(&self, image: &image::RgbImage, pdf_path: &str) -> Result<String> {
        let source = ocrs::ImageSource::from_bytes(image.as_raw(), image.dimensions()).map_err(
            |e| AgentError::Ocr {
                message: format!("invalid page image: {e}"),
                pdf_path: Some(pdf_path.to_string()),
                not_installed: false,
            },
        )?;

        let input = self.engine.prepare_input(source).map_err(|e| AgentError::Ocr {
            message: format!("OCR processing failed: {e}"),
            pdf_path: Some(pdf_path.to_string()),
            not_installed: false,
        })?;

        self.engine.get_text(&input).map_err(|e| AgentError::Ocr {
            message: format!("OCR processing failed: {e}"),
            pdf_path: Some(pdf_path.to_string()),
            not_installed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_models_report_not_installed() {
        let paths = OcrModelPaths {
            detection: PathBuf::from("/nonexistent/detection.rten"),
            recognition: PathBuf::from("/nonexistent/recognition.rten"),
        };
        match OcrRunner::load(&paths) {
            Err(AgentError::Ocr { not_installed, .. }) => assert!(not_installed),
            other => panic!("expected not-installed OCR error, got {other:?}"),
        }
    }
}
