// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR engine — one recognition worker per request.
//
// A `RecognitionBackend` spawns workers; the engine spawns exactly one per
// call, runs it once, and terminates it on every exit path through
// `WorkerGuard`. Workers are never pooled or handed to another request.
//
// The `ocrs` backend lives behind the `ocr` feature. Without it the engine is
// built with `OcrEngine::unavailable()`, which fails worker start-up.

pub mod languages;
#[cfg(feature = "ocr")]
pub mod ocrs_backend;

use std::path::Path;
use std::sync::Arc;

use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::{DocumentFormat, ImageKind, OcrRequest};
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Text and confidence produced by one recognition pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    /// 0 to 100.
    pub confidence: f32,
}

/// A recognition context bound to one language and one request.
pub trait RecognitionWorker: Send {
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition>;

    /// Free the worker's resources. Called exactly once.
    fn terminate(self: Box<Self>);
}

/// Factory for recognition workers.
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn spawn_worker(&self, language: &str) -> Result<Box<dyn RecognitionWorker>>;
}

/// Terminates the worker when dropped.
struct WorkerGuard {
    worker: Option<Box<dyn RecognitionWorker>>,
}

impl WorkerGuard {
    fn new(worker: Box<dyn RecognitionWorker>) -> Self {
        Self {
            worker: Some(worker),
        }
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition> {
        match self.worker.as_mut() {
            Some(worker) => worker.recognize(image),
            None => Err(DokwerkError::Recognition("worker already terminated".into())),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
            debug!("recognition worker terminated");
        }
    }
}

/// Backend used when no recognition models are compiled in or configured.
struct UnavailableBackend {
    reason: String,
}

impl RecognitionBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn spawn_worker(&self, _language: &str) -> Result<Box<dyn RecognitionWorker>> {
        Err(DokwerkError::WorkerInit(self.reason.clone()))
    }
}

#[derive(Clone)]
pub struct OcrEngine {
    backend: Arc<dyn RecognitionBackend>,
}

impl std::fmt::Debug for OcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrEngine")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl OcrEngine {
    pub fn new(backend: Arc<dyn RecognitionBackend>) -> Self {
        Self { backend }
    }

    /// An engine whose workers always fail to start with `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(Arc::new(UnavailableBackend {
            reason: reason.into(),
        }))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Extract text from the image in `request.source`.
    ///
    /// The format and language are checked before a worker is spawned.
    #[instrument(skip(self, request), fields(backend = self.backend.name(), language = %request.language))]
    pub fn recognize(&self, request: &OcrRequest) -> Result<Recognition> {
        let kind = supported_kind(request.source.format)?;
        languages::validate(&request.language)?;
        let image = decode(&request.source.path, kind)?;

        let mut guard = WorkerGuard::new(self.backend.spawn_worker(&request.language)?);
        let recognition = guard.recognize(&image)?;
        drop(guard);

        info!(
            chars = recognition.text.chars().count(),
            confidence = recognition.confidence,
            "OCR complete"
        );
        Ok(recognition)
    }
}

fn supported_kind(format: DocumentFormat) -> Result<ImageKind> {
    match format {
        DocumentFormat::Image(kind) if kind.is_ocr_supported() => Ok(kind),
        DocumentFormat::Image(kind) => Err(DokwerkError::UnsupportedImageFormat(
            kind.mime_type().to_string(),
        )),
        other => Err(DokwerkError::UnsupportedImageFormat(
            other.mime_type().to_string(),
        )),
    }
}

fn decode(path: &Path, kind: ImageKind) -> Result<DynamicImage> {
    let unreadable = |err: &dyn std::fmt::Display| {
        DokwerkError::SourceUnreadable(format!("{}: {err}", path.display()))
    };
    let image = ImageReader::open(path)
        .map_err(|err| unreadable(&err))?
        .with_guessed_format()
        .map_err(|err| unreadable(&err))?
        .decode()
        .map_err(|err| unreadable(&err))?;
    debug!(
        width = image.width(),
        height = image.height(),
        declared = kind.extension(),
        "image decoded"
    );
    Ok(image)
}
