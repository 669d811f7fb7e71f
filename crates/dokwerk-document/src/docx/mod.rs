// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DOCX (Office Open XML) support: plain-text extraction and minimal
// document generation. Both sides work on the ZIP container directly.

pub mod reader;
pub mod writer;

/// Archive entry holding the document body.
pub(crate) const DOCUMENT_PART: &str = "word/document.xml";
