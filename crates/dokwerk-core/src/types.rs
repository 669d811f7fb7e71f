// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Dokwerk processing pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DokwerkError;

/// Language used for OCR when the caller does not specify one.
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

/// Identifier of an authenticated user, as resolved by the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raster image subtypes the service can receive.
///
/// `Gif` is representable so that it can be recognised and refused; it is not
/// on the OCR allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Webp,
    Gif,
}

impl ImageKind {
    /// Image subtypes accepted by the OCR engine.
    pub const OCR_SUPPORTED: [ImageKind; 5] = [
        ImageKind::Jpeg,
        ImageKind::Png,
        ImageKind::Bmp,
        ImageKind::Tiff,
        ImageKind::Webp,
    ];

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    /// Canonical file extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }

    pub fn is_ocr_supported(&self) -> bool {
        Self::OCR_SUPPORTED.contains(self)
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }
}

/// Closed set of formats an [`Artifact`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Image(ImageKind),
}

impl DocumentFormat {
    /// MIME type used in `Content-Type` headers by the transport layer.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Image(kind) => kind.mime_type(),
        }
    }

    /// Canonical file extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Image(kind) => kind.extension(),
        }
    }

    /// Infer the format from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            other => ImageKind::from_extension(other).map(Self::Image),
        }
    }

    /// Infer the format from a declared MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "image/jpeg" | "image/jpg" => Some(Self::Image(ImageKind::Jpeg)),
            "image/png" => Some(Self::Image(ImageKind::Png)),
            "image/bmp" => Some(Self::Image(ImageKind::Bmp)),
            "image/tiff" => Some(Self::Image(ImageKind::Tiff)),
            "image/webp" => Some(Self::Image(ImageKind::Webp)),
            "image/gif" => Some(Self::Image(ImageKind::Gif)),
            _ => None,
        }
    }

    /// Infer the format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentFormat {
    type Err = DokwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        Self::from_extension(trimmed)
            .or_else(|| Self::from_mime_type(trimmed))
            .ok_or_else(|| DokwerkError::InvalidParameter(format!("unknown format: {s}")))
    }
}

/// Standard paper sizes for generated PDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    A4,
    A5,
    Letter,
    Legal,
    Custom { width_mm: u32, height_mm: u32 },
}

impl PaperSize {
    /// Dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::A4 => (210, 297),
            Self::A5 => (148, 210),
            Self::Letter => (216, 279),
            Self::Legal => (216, 356),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }
}

/// A transient file produced or consumed by a pipeline stage.
///
/// An `Artifact` is only a description of the file; deletion is the business
/// of the artifact manager in `dokwerk-document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, format: DocumentFormat, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            format,
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// File name component of the path, lossily decoded.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// PDF re-packing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Re-serialise with a flat object layout.
    Low,
    /// Prune, renumber, and deflate streams.
    #[default]
    Medium,
    /// Medium plus dropping thumbnails and XMP metadata.
    High,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Short description for capability listings.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "light re-serialisation, keeps every object",
            Self::Medium => "prunes unused objects and deflates uncompressed streams",
            Self::High => "medium plus removal of page thumbnails and XMP metadata",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = DokwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(DokwerkError::InvalidParameter(format!(
                "invalid compression level '{other}'; use low, medium, or high"
            ))),
        }
    }
}

/// The three operations the pipeline can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Convert,
    Compress,
    Ocr,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Compress => "compress",
            Self::Ocr => "ocr",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DokwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "convert" => Ok(Self::Convert),
            "compress" => Ok(Self::Compress),
            "ocr" => Ok(Self::Ocr),
            other => Err(DokwerkError::InvalidParameter(format!(
                "unknown operation '{other}'"
            ))),
        }
    }
}

/// Request to convert `source` into `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub source: Artifact,
    pub target: DocumentFormat,
}

impl ConversionRequest {
    /// Build a request, rejecting no-op conversions up front.
    pub fn new(source: Artifact, target: DocumentFormat) -> Result<Self, DokwerkError> {
        if source.format == target {
            return Err(DokwerkError::NoOpConversion(target));
        }
        Ok(Self { source, target })
    }
}

/// Request to re-pack a PDF under `level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionRequest {
    pub source: Artifact,
    pub level: CompressionLevel,
}

impl CompressionRequest {
    /// Build a request, rejecting sources not declared as PDF.
    pub fn new(source: Artifact, level: CompressionLevel) -> Result<Self, DokwerkError> {
        if source.format != DocumentFormat::Pdf {
            return Err(DokwerkError::NotAPdf(format!("declared as {}", source.format)));
        }
        Ok(Self { source, level })
    }
}

/// Request to extract text from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    pub source: Artifact,
    pub language: String,
}

impl OcrRequest {
    pub fn new(source: Artifact, language: Option<&str>) -> Self {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_OCR_LANGUAGE)
            .to_string();
        Self { source, language }
    }
}

/// Whether a successful operation achieved its nominal goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Content was carried over from the source.
    Faithful,
    /// The output is a notice standing in for content that was not extracted.
    Placeholder,
}
