// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Dokwerk.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DocumentFormat;

/// Top-level error type for all Dokwerk operations.
#[derive(Debug, Error)]
pub enum DokwerkError {
    // -- Validation --
    #[error("no conversion path from {from} to {to}")]
    UnsupportedConversion {
        from: DocumentFormat,
        to: DocumentFormat,
    },

    #[error("document is already in {0} format")]
    NoOpConversion(DocumentFormat),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("not a PDF: {0}")]
    NotAPdf(String),

    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    // -- Artifacts --
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("failed to write output: {0}")]
    WriteFailure(String),

    // -- Engines --
    #[error("PDF could not be parsed: {0}")]
    PdfParse(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("recognition worker could not be started: {0}")]
    WorkerInit(String),

    // -- Quota / identity --
    #[error("monthly request limit of {limit} reached ({used} used); resets at {reset_at}")]
    QuotaExceeded {
        limit: u64,
        used: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("quota store unavailable: {0}")]
    QuotaUnavailable(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DokwerkError>;

/// Coarse error classes used to pick a transport status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing parameters, unsupported formats, no-op conversions.
    Validation,
    /// Unreadable or unwritable artifacts, filesystem exhaustion.
    Resource,
    /// Failure inside a conversion, compression, or recognition library.
    Engine,
    QuotaExceeded,
    /// The usage store could not be consulted and the policy is fail-closed.
    QuotaUnavailable,
    Unauthenticated,
}

impl ErrorKind {
    /// HTTP-equivalent status code for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthenticated => 401,
            Self::QuotaExceeded => 429,
            Self::Resource | Self::Engine => 500,
            Self::QuotaUnavailable => 503,
        }
    }
}

impl DokwerkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedConversion { .. }
            | Self::NoOpConversion(_)
            | Self::InvalidParameter(_)
            | Self::PayloadTooLarge { .. }
            | Self::NotAPdf(_)
            | Self::UnsupportedImageFormat(_) => ErrorKind::Validation,
            Self::SourceUnreadable(_)
            | Self::WriteFailure(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Resource,
            Self::PdfParse(_) | Self::Recognition(_) | Self::WorkerInit(_) => ErrorKind::Engine,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::QuotaUnavailable(_) => ErrorKind::QuotaUnavailable,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
        }
    }

    /// Stable machine-readable identifier for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedConversion { .. } => "unsupported_conversion",
            Self::NoOpConversion(_) => "no_op_conversion",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::NotAPdf(_) => "not_a_pdf",
            Self::UnsupportedImageFormat(_) => "unsupported_image_format",
            Self::SourceUnreadable(_) => "source_unreadable",
            Self::WriteFailure(_) => "write_failure",
            Self::PdfParse(_) => "parse_failure",
            Self::Recognition(_) => "recognition_failure",
            Self::WorkerInit(_) => "worker_init_failure",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::QuotaUnavailable(_) => "quota_unavailable",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Database(_) => "database_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Pipeline stage an error surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Conversion,
    Compression,
    Recognition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Conversion => "conversion",
            Self::Compression => "compression",
            Self::Recognition => "recognition",
        })
    }
}

/// An engine error annotated with the stage that produced it.
///
/// The wrapped error keeps its kind; the stage is context only.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: DokwerkError,
}

impl StageError {
    pub fn new(stage: Stage, error: DokwerkError) -> Self {
        Self { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
