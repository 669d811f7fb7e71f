// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// What this build can do, for listing to callers.

use dokwerk_core::types::{CompressionLevel, DocumentFormat, ImageKind};
use serde::{Deserialize, Serialize};

use crate::convert::SUPPORTED_CONVERSIONS;
use crate::ocr::languages::LANGUAGES;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionPair {
    pub from: DocumentFormat,
    pub to: DocumentFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: CompressionLevel,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub conversions: Vec<ConversionPair>,
    pub compression_levels: Vec<LevelInfo>,
    pub default_compression_level: CompressionLevel,
    /// MIME types accepted for OCR.
    pub ocr_formats: Vec<String>,
    pub ocr_languages: Vec<LanguageInfo>,
    pub default_language: String,
    pub ocr_backend: String,
}

impl Capabilities {
    pub fn collect(default_language: &str, ocr_backend: &str) -> Self {
        Self {
            conversions: SUPPORTED_CONVERSIONS
                .iter()
                .map(|&(from, to)| ConversionPair { from, to })
                .collect(),
            compression_levels: CompressionLevel::ALL
                .iter()
                .map(|&level| LevelInfo {
                    level,
                    description: level.description().to_string(),
                })
                .collect(),
            default_compression_level: CompressionLevel::default(),
            ocr_formats: ImageKind::OCR_SUPPORTED
                .iter()
                .map(|kind| kind.mime_type().to_string())
                .collect(),
            ocr_languages: LANGUAGES
                .iter()
                .map(|(code, name)| LanguageInfo {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            default_language: default_language.to_string(),
            ocr_backend: ocr_backend.to_string(),
        }
    }
}
