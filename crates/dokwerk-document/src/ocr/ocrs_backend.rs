// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition backend built on `ocrs`, a pure-Rust OCR engine running neural
// network models through `rten`.
//
// Two model files are required in the model directory:
//
// - `text-detection.rten` locates words in the image.
// - `text-recognition.rten` decodes characters from detected lines.
//
// `ocrs-cli` downloads both to `$XDG_CACHE_HOME/ocrs` on first use, which is
// the default directory here as well.
//
// The models are script-based rather than language-based, so the requested
// language only labels the worker. Each worker loads its own engine and drops
// it on termination.
//
// `ocrs` and `rten` must be built in release mode; debug builds are 10-100x
// slower.

use std::path::{Path, PathBuf};

use dokwerk_core::error::{DokwerkError, Result};
use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine as OcrsEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, instrument};

use super::{Recognition, RecognitionBackend, RecognitionWorker};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, then `~/.cache/ocrs`, then `./ocrs-models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Model locations for the `ocrs` backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrsConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrsConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrsConfig {
    /// Expects `text-detection.rten` and `text-recognition.rten` in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (role, path) in [
            ("detection", &self.detection_model_path),
            ("recognition", &self.recognition_model_path),
        ] {
            if !path.is_file() {
                return Err(DokwerkError::WorkerInit(format!(
                    "{role} model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Spawns one `ocrs` engine per request.
#[derive(Debug, Clone)]
pub struct OcrsBackend {
    config: OcrsConfig,
}

impl OcrsBackend {
    pub fn new(config: OcrsConfig) -> Self {
        Self { config }
    }
}

impl RecognitionBackend for OcrsBackend {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    #[instrument(skip(self), fields(
        detection = %self.config.detection_model_path.display(),
        recognition = %self.config.recognition_model_path.display(),
    ))]
    fn spawn_worker(&self, language: &str) -> Result<Box<dyn RecognitionWorker>> {
        self.config.validate()?;

        let detection_model = Model::load_file(&self.config.detection_model_path)
            .map_err(|err| DokwerkError::WorkerInit(format!("detection model: {err}")))?;
        let recognition_model = Model::load_file(&self.config.recognition_model_path)
            .map_err(|err| DokwerkError::WorkerInit(format!("recognition model: {err}")))?;

        let engine = OcrsEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| DokwerkError::WorkerInit(err.to_string()))?;

        info!(language, "ocrs worker ready");
        Ok(Box::new(OcrsWorker {
            engine,
            language: language.to_string(),
        }))
    }
}

struct OcrsWorker {
    engine: OcrsEngine,
    language: String,
}

impl RecognitionWorker for OcrsWorker {
    #[instrument(skip_all, fields(width = image.width(), height = image.height(), language = %self.language))]
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            DokwerkError::Recognition(format!("image source ({width}x{height}): {err}"))
        })?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| DokwerkError::Recognition(format!("preprocessing: {err}")))?;

        let words = self
            .engine
            .detect_words(&input)
            .map_err(|err| DokwerkError::Recognition(format!("word detection: {err}")))?;
        let lines = self.engine.find_text_lines(&input, &words);
        let recognized = self
            .engine
            .recognize_text(&input, &lines)
            .map_err(|err| DokwerkError::Recognition(format!("line recognition: {err}")))?;

        let texts: Vec<String> = recognized
            .iter()
            .flatten()
            .map(|line| line.to_string())
            .filter(|line| !line.trim().is_empty())
            .collect();

        debug!(
            words = words.len(),
            lines = lines.len(),
            recognized = texts.len(),
            "ocrs pass complete"
        );

        Ok(Recognition {
            confidence: line_confidence(texts.len(), lines.len()),
            text: texts.join("\n"),
        })
    }

    fn terminate(self: Box<Self>) {
        debug!(language = %self.language, "ocrs worker dropped");
    }
}

/// `ocrs` reports no per-character scores; use the share of detected lines
/// that produced text, as a percentage.
fn line_confidence(recognized: usize, detected: usize) -> f32 {
    if detected == 0 {
        return 0.0;
    }
    (recognized as f32 / detected as f32 * 100.0).min(100.0)
}
