// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion engine — DOCX to PDF by textual re-flow, PDF to DOCX by
// placeholder.
//
// PDF to DOCX does not extract content. It produces a short notice naming the
// source file and reports `Fidelity::Placeholder` so callers can tell the
// difference from a faithful conversion.

use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::{ConversionRequest, DocumentFormat, Fidelity, PaperSize};
use tracing::{info, instrument};

use crate::artifact::{ArtifactLease, ArtifactManager};
use crate::docx::reader;
use crate::docx::writer::DocxWriter;
use crate::pdf::writer::PdfWriter;

/// Format pairs the engine can convert, as (source, target).
pub const SUPPORTED_CONVERSIONS: [(DocumentFormat, DocumentFormat); 2] = [
    (DocumentFormat::Docx, DocumentFormat::Pdf),
    (DocumentFormat::Pdf, DocumentFormat::Docx),
];

pub fn is_supported(from: DocumentFormat, to: DocumentFormat) -> bool {
    SUPPORTED_CONVERSIONS.contains(&(from, to))
}

/// Result of one conversion. The output file is deleted when the lease drops.
#[derive(Debug)]
pub struct Conversion {
    pub output: ArtifactLease,
    pub fidelity: Fidelity,
}

#[derive(Debug, Clone)]
pub struct ConversionEngine {
    artifacts: ArtifactManager,
    paper_size: PaperSize,
}

impl ConversionEngine {
    pub fn new(artifacts: ArtifactManager, paper_size: PaperSize) -> Self {
        Self {
            artifacts,
            paper_size,
        }
    }

    /// Convert `request.source` into `request.target`.
    ///
    /// `source_name` is the caller-facing name of the input file; it seeds the
    /// output name and appears in placeholder documents.
    #[instrument(skip(self, request), fields(from = %request.source.format, to = %request.target))]
    pub fn convert(&self, request: &ConversionRequest, source_name: &str) -> Result<Conversion> {
        match (request.source.format, request.target) {
            (DocumentFormat::Docx, DocumentFormat::Pdf) => self.docx_to_pdf(request, source_name),
            (DocumentFormat::Pdf, DocumentFormat::Docx) => self.pdf_to_docx(request, source_name),
            (from, to) => Err(DokwerkError::UnsupportedConversion { from, to }),
        }
    }

    fn docx_to_pdf(&self, request: &ConversionRequest, source_name: &str) -> Result<Conversion> {
        let text = reader::read_text(&request.source.path)?;

        let mut writer = PdfWriter::new(self.paper_size);
        writer.set_title(stem_of(source_name));

        let output = self.artifacts.allocate(source_name, DocumentFormat::Pdf)?;
        let mut output = self.artifacts.lease(output);
        writer.write_text_to_file(&text, output.path())?;
        output.refresh()?;

        info!(
            chars = text.chars().count(),
            bytes = output.artifact().size_bytes,
            "DOCX re-flowed into PDF"
        );
        Ok(Conversion {
            output,
            fidelity: Fidelity::Faithful,
        })
    }

    fn pdf_to_docx(&self, request: &ConversionRequest, source_name: &str) -> Result<Conversion> {
        if !request.source.path.is_file() {
            return Err(DokwerkError::SourceUnreadable(format!(
                "{} does not exist",
                request.source.path.display()
            )));
        }

        let mut writer = DocxWriter::new();
        writer
            .push_paragraph("PDF to DOCX conversion")
            .push_paragraph(
                "The text of the original PDF was not extracted. This document \
                 stands in for it until a PDF text extractor is available.",
            )
            .push_paragraph(format!("Original file: {}", base_name(source_name)));

        let output = self.artifacts.allocate(source_name, DocumentFormat::Docx)?;
        let mut output = self.artifacts.lease(output);
        writer.write_to_file(output.path())?;
        output.refresh()?;

        info!(
            bytes = output.artifact().size_bytes,
            "PDF replaced by placeholder DOCX"
        );
        Ok(Conversion {
            output,
            fidelity: Fidelity::Placeholder,
        })
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// File name without directories or the last extension.
pub(crate) fn stem_of(name: &str) -> &str {
    let base = base_name(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

/// Download name for a converted file: `<stem>.<target ext>`.
pub fn converted_name(source_name: &str, target: DocumentFormat) -> String {
    format!("{}.{}", stem_of(source_name), target.extension())
}
