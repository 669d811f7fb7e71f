// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-visible failure descriptions.
//
// Every error that leaves the service is rendered as a `Failure`: a stable
// kind and code, the HTTP-equivalent status, the stage that failed (when the
// pipeline knows it), a message, and a hint about what the caller can do.

use serde::{Deserialize, Serialize};

use crate::error::{DokwerkError, ErrorKind, Stage, StageError};

/// Structured failure handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    /// Stable identifier (e.g. `not_a_pdf`).
    pub code: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
    pub hint: String,
    /// Whether repeating the same request later could succeed.
    pub retriable: bool,
}

impl Failure {
    /// Attach the stage that produced this failure.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

impl From<&DokwerkError> for Failure {
    fn from(err: &DokwerkError) -> Self {
        let kind = err.kind();
        let (hint, retriable) = hint_for(err);
        Self {
            kind,
            code: err.code().to_string(),
            status: kind.status_code(),
            stage: None,
            message: err.to_string(),
            hint,
            retriable,
        }
    }
}

impl From<DokwerkError> for Failure {
    fn from(err: DokwerkError) -> Self {
        Self::from(&err)
    }
}

impl From<&StageError> for Failure {
    fn from(err: &StageError) -> Self {
        Self::from(&err.error).at_stage(err.stage)
    }
}

impl From<StageError> for Failure {
    fn from(err: StageError) -> Self {
        Self::from(&err)
    }
}

fn hint_for(err: &DokwerkError) -> (String, bool) {
    match err {
        DokwerkError::UnsupportedConversion { .. } => (
            "Supported conversions are DOCX to PDF and PDF to DOCX.".into(),
            false,
        ),
        DokwerkError::NoOpConversion(format) => (
            format!("The file is already {format}; pick a different target format."),
            false,
        ),
        DokwerkError::InvalidParameter(_) => {
            ("Check the request parameters and try again.".into(), false)
        }
        DokwerkError::PayloadTooLarge { limit, .. } => (
            format!("Upload a file no larger than {} KiB.", limit / 1024),
            false,
        ),
        DokwerkError::NotAPdf(_) => ("Only PDF files can be compressed.".into(), false),
        DokwerkError::UnsupportedImageFormat(_) => (
            "Send a JPEG, PNG, BMP, TIFF, or WEBP image.".into(),
            false,
        ),
        DokwerkError::SourceUnreadable(_) => (
            "The uploaded file may be damaged. Try exporting it again.".into(),
            false,
        ),
        DokwerkError::WriteFailure(_) | DokwerkError::Io(_) => (
            "The server could not store the result. Try again shortly.".into(),
            true,
        ),
        DokwerkError::PdfParse(_) => (
            "The PDF structure is damaged. Open and re-save it in a PDF viewer first.".into(),
            false,
        ),
        DokwerkError::Recognition(_) => (
            "Try a sharper, higher-contrast image.".into(),
            true,
        ),
        DokwerkError::WorkerInit(_) => (
            "Text recognition is temporarily unavailable. Try again later.".into(),
            true,
        ),
        DokwerkError::QuotaExceeded { reset_at, .. } => (
            format!("Your monthly allowance resets at {}.", reset_at.to_rfc3339()),
            false,
        ),
        DokwerkError::QuotaUnavailable(_) | DokwerkError::Database(_) => (
            "Usage accounting is temporarily unavailable. Try again shortly.".into(),
            true,
        ),
        DokwerkError::Unauthenticated(_) => (
            "Send a valid API key in the Authorization header.".into(),
            false,
        ),
        DokwerkError::Serialization(_) => (
            "The server had an internal data problem. Try again.".into(),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentFormat;

    #[test]
    fn not_a_pdf_is_a_400() {
        let failure = Failure::from(DokwerkError::NotAPdf("upload.docx".into()));
        assert_eq!(failure.kind, ErrorKind::Validation);
        assert_eq!(failure.status, 400);
        assert_eq!(failure.code, "not_a_pdf");
        assert!(!failure.retriable);
    }

    #[test]
    fn stage_is_carried_through() {
        let err = StageError::new(
            Stage::Conversion,
            DokwerkError::UnsupportedConversion {
                from: DocumentFormat::Pdf,
                to: DocumentFormat::Pdf,
            },
        );
        let failure = Failure::from(&err);
        assert_eq!(failure.stage, Some(Stage::Conversion));
        assert_eq!(failure.code, "unsupported_conversion");
    }

    #[test]
    fn worker_init_is_retriable_engine_failure() {
        let failure = Failure::from(DokwerkError::WorkerInit("models missing".into()));
        assert_eq!(failure.kind, ErrorKind::Engine);
        assert_eq!(failure.status, 500);
        assert!(failure.retriable);
    }
}
