// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Operation, PaperSize};

const MIB: u64 = 1024 * 1024;

/// What the quota enforcer does when the usage store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaFailMode {
    /// Reject the request.
    #[default]
    Closed,
    /// Admit the request without recording it.
    Open,
}

/// Persistent service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Managed root for scratch artifacts (uploads and outputs).
    pub temp_root: PathBuf,
    /// SQLite database holding usage records and API keys.
    pub database_path: PathBuf,
    /// Operations each user may run per calendar month.
    pub monthly_limit: u64,
    pub quota_fail_mode: QuotaFailMode,
    /// Longest time an output artifact may sit unconsumed before the sweeper
    /// deletes it.
    pub retention_secs: u64,
    /// Minimum age of a temp file before the start-up sweep touches it. Must
    /// exceed the longest operation so another process's in-flight files
    /// survive.
    pub sweep_grace_secs: u64,
    /// Upload size caps per operation, in bytes.
    pub max_conversion_bytes: u64,
    pub max_compression_bytes: u64,
    pub max_ocr_bytes: u64,
    /// OCR language used when a request does not name one.
    pub default_language: String,
    /// Page size used when re-flowing DOCX text into a PDF.
    pub paper_size: PaperSize,
    /// Directory holding the OCR detection/recognition models.
    pub ocr_model_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp"),
            database_path: PathBuf::from("dokwerk.db"),
            monthly_limit: 100,
            quota_fail_mode: QuotaFailMode::Closed,
            retention_secs: 60,
            sweep_grace_secs: 3600,
            max_conversion_bytes: 10 * MIB,
            max_compression_bytes: 50 * MIB,
            max_ocr_bytes: 10 * MIB,
            default_language: crate::types::DEFAULT_OCR_LANGUAGE.to_string(),
            paper_size: PaperSize::A4,
            ocr_model_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Upload size cap for `operation`.
    pub fn upload_limit(&self, operation: Operation) -> u64 {
        match operation {
            Operation::Convert => self.max_conversion_bytes,
            Operation::Compress => self.max_compression_bytes,
            Operation::Ocr => self.max_ocr_bytes,
        }
    }

    /// Read a JSON config file. Missing keys take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write this config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
