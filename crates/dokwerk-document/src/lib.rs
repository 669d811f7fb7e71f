// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// dokwerk-document — the processing core of Dokwerk.
//
// Provides the temporary artifact manager, DOCX/PDF conversion, PDF
// compression, OCR behind a pluggable recognition backend, and the pipeline
// dispatcher that ties them together.

pub mod artifact;
pub mod capabilities;
pub mod convert;
pub mod docx;
pub mod ocr;
pub mod pdf;
pub mod pipeline;

pub use artifact::{ArtifactLease, ArtifactManager};
pub use capabilities::Capabilities;
pub use convert::ConversionEngine;
pub use ocr::{OcrEngine, Recognition, RecognitionBackend, RecognitionWorker};
pub use pdf::compress::CompressionMetrics;
pub use pdf::writer::PdfWriter;
pub use pipeline::{Job, Metrics, OperationParams, OperationResult, Pipeline, Processed, Task};

#[cfg(feature = "ocr")]
pub use ocr::ocrs_backend::{OcrsBackend, OcrsConfig};
