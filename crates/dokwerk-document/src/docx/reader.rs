// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DOCX reader — pulls the plain text out of `word/document.xml`.
//
// Only the text runs matter here, so the body is scanned tag by tag instead of
// being parsed into a tree: `<w:t>` content is kept, `<w:tab/>` becomes a tab,
// `<w:br/>` and `<w:cr/>` become line breaks, and every closing `</w:p>` ends
// a line. Tab stop definitions inside `<w:tabs>` are skipped. Styling,
// headers and footers are ignored.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use dokwerk_core::error::{DokwerkError, Result};
use tracing::{debug, instrument};
use zip::ZipArchive;

use super::DOCUMENT_PART;

/// Largest inflated `word/document.xml` accepted. Upload caps bound the
/// compressed package only.
pub const MAX_DOCUMENT_XML_BYTES: u64 = 64 * 1024 * 1024;

/// Extract the body text of the DOCX at `path`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_text(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("{}: {err}", path.display())))?;
    read_text_from(file)
}

/// Extract the body text from any seekable DOCX source.
pub fn read_text_from<R: Read + Seek>(source: R) -> Result<String> {
    read_text_bounded(source, MAX_DOCUMENT_XML_BYTES)
}

/// As [`read_text_from`], refusing a document part that inflates past
/// `limit` bytes.
pub fn read_text_bounded<R: Read + Seek>(source: R, limit: u64) -> Result<String> {
    let mut archive = ZipArchive::new(source)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("not a DOCX package: {err}")))?;
    let mut part = archive.by_name(DOCUMENT_PART).map_err(|err| {
        DokwerkError::SourceUnreadable(format!("missing {DOCUMENT_PART}: {err}"))
    })?;

    let too_large = || {
        DokwerkError::SourceUnreadable(format!(
            "{DOCUMENT_PART} inflates past {limit} bytes"
        ))
    };
    if part.size() > limit {
        return Err(too_large());
    }

    // The declared size comes from the archive and may lie.
    let mut xml = String::new();
    (&mut part)
        .take(limit.saturating_add(1))
        .read_to_string(&mut xml)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("{DOCUMENT_PART}: {err}")))?;
    if xml.len() as u64 > limit {
        return Err(too_large());
    }

    let text = text_from_document_xml(&xml);
    debug!(xml_len = xml.len(), text_len = text.len(), "DOCX text extracted");
    Ok(text)
}

/// Scan WordprocessingML for text runs. Trailing line breaks are trimmed.
pub fn text_from_document_xml(xml: &str) -> String {
    let mut out = String::new();
    let mut in_text = false;
    let mut in_tab_stops = false;
    let mut rest = xml;

    while let Some(lt) = rest.find('<') {
        if in_text {
            out.push_str(&decode_entities(&rest[..lt]));
        }
        let tail = &rest[lt..];
        let Some(gt) = tail.find('>') else {
            break;
        };
        let tag = &tail[1..gt];
        rest = &tail[gt + 1..];

        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();

        match name {
            "w:t" => in_text = !closing && !self_closing,
            "w:tabs" => in_tab_stops = !closing && !self_closing,
            "w:tab" if !closing && !in_tab_stops => out.push('\t'),
            "w:br" | "w:cr" if !closing => out.push('\n'),
            "w:p" if closing || self_closing => out.push('\n'),
            _ => {}
        }
    }

    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
    out
}

fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
