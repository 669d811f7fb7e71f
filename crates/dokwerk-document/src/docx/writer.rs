// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DOCX writer — emits the smallest package Word and LibreOffice accept:
// content types, the package relationship, and a body of plain paragraphs.

use std::io::{Cursor, Write};
use std::path::Path;

use dokwerk_core::error::{DokwerkError, Result};
use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use super::DOCUMENT_PART;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_CLOSE: &str = "</w:body></w:document>";

/// Builds a DOCX out of plain-text paragraphs.
#[derive(Debug, Clone, Default)]
pub struct DocxWriter {
    paragraphs: Vec<String>,
}

impl DocxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One paragraph per line of `text`.
    pub fn from_text(text: &str) -> Self {
        Self {
            paragraphs: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn push_paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.paragraphs.push(text.into());
        self
    }

    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    /// The `word/document.xml` part.
    pub fn document_xml(&self) -> String {
        let mut xml = String::from(DOCUMENT_OPEN);
        for paragraph in &self.paragraphs {
            xml.push_str("<w:p>");
            if !paragraph.is_empty() {
                xml.push_str("<w:r>");
                for (i, segment) in paragraph.split('\t').enumerate() {
                    if i > 0 {
                        xml.push_str("<w:tab/>");
                    }
                    if !segment.is_empty() {
                        xml.push_str(r#"<w:t xml:space="preserve">"#);
                        escape_into(&mut xml, segment);
                        xml.push_str("</w:t>");
                    }
                }
                xml.push_str("</w:r>");
            }
            xml.push_str("</w:p>");
        }
        xml.push_str(DOCUMENT_CLOSE);
        xml
    }

    /// Serialise the package.
    #[instrument(skip(self), fields(paragraphs = self.paragraphs.len()))]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let parts = [
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", PACKAGE_RELS.to_string()),
            (DOCUMENT_PART, self.document_xml()),
        ];
        for (name, body) in &parts {
            zip.start_file(*name, options)
                .map_err(|err| DokwerkError::WriteFailure(format!("{name}: {err}")))?;
            zip.write_all(body.as_bytes())
                .map_err(|err| DokwerkError::WriteFailure(format!("{name}: {err}")))?;
        }

        let cursor = zip
            .finish()
            .map_err(|err| DokwerkError::WriteFailure(format!("cannot finish DOCX: {err}")))?;
        let bytes = cursor.into_inner();
        debug!(bytes = bytes.len(), "DOCX package built");
        Ok(bytes)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), bytes).map_err(|err| {
            DokwerkError::WriteFailure(format!("{}: {err}", path.as_ref().display()))
        })
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}
