// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF compression — container-level re-packing with `lopdf`.
//
// Images are never re-encoded. The levels only change how the object graph is
// serialised:
//
//   low    — load and save as-is (flat object layout, original numbering)
//   medium — drop unreachable objects and empty streams, renumber objects
//            densely, and deflate every stream that is not yet filtered
//   high   — medium, after removing page thumbnails and the catalog's XMP
//            metadata stream
//
// Form-field appearance streams are never regenerated at any level; lopdf
// copies whatever the source contains.

use std::io::Read;
use std::path::Path;

use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::{CompressionLevel, CompressionRequest};
use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// The PDF header must start within the first 1024 bytes.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Size accounting for one compression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetrics {
    pub level: CompressionLevel,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Percentage saved, rounded to two decimals. Zero or negative when
    /// re-packing did not shrink the file.
    pub compression_ratio: f64,
    /// `original_size - compressed_size`; negative if the file grew.
    pub saved_bytes: i64,
}

impl CompressionMetrics {
    pub fn new(level: CompressionLevel, original_size: u64, compressed_size: u64) -> Self {
        Self {
            level,
            original_size,
            compressed_size,
            compression_ratio: compression_ratio(original_size, compressed_size),
            saved_bytes: original_size as i64 - compressed_size as i64,
        }
    }
}

/// `round((original - compressed) / original * 100, 2)`; 0.0 for an empty
/// original.
pub fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    let saved = original as f64 - compressed as f64;
    (saved / original as f64 * 100.0 * 100.0).round() / 100.0
}

/// Whether `data` carries a `%PDF-` header within the allowed window.
pub fn has_pdf_header(data: &[u8]) -> bool {
    let window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Check the file header without parsing the document.
pub fn file_has_pdf_header(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("{}: {err}", path.display())))?;
    let mut head = Vec::with_capacity(HEADER_SEARCH_WINDOW);
    file.take(HEADER_SEARCH_WINDOW as u64)
        .read_to_end(&mut head)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("{}: {err}", path.display())))?;
    Ok(has_pdf_header(&head))
}

/// Re-serialise PDF bytes under `level`.
#[instrument(skip(data), fields(bytes_len = data.len(), %level))]
pub fn compress_bytes(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    if !has_pdf_header(data) {
        return Err(DokwerkError::NotAPdf("missing %PDF- header".into()));
    }

    let mut document = Document::load_mem(data)
        .map_err(|err| DokwerkError::PdfParse(err.to_string()))?;
    debug!(
        pages = document.get_pages().len(),
        objects = document.objects.len(),
        "PDF parsed"
    );

    repack(&mut document, level);

    let mut output = Vec::new();
    document
        .save_to(&mut output)
        .map_err(|err| DokwerkError::WriteFailure(format!("failed to serialise PDF: {err}")))?;
    Ok(output)
}

/// Compress `request.source` into `output` and report the size change.
#[instrument(skip_all, fields(input = %request.source.path.display(), level = %request.level))]
pub fn compress_file(
    request: &CompressionRequest,
    output: impl AsRef<Path>,
) -> Result<CompressionMetrics> {
    let input = &request.source.path;
    let data = std::fs::read(input)
        .map_err(|err| DokwerkError::SourceUnreadable(format!("{}: {err}", input.display())))?;

    let compressed = compress_bytes(&data, request.level)?;
    std::fs::write(output.as_ref(), &compressed).map_err(|err| {
        DokwerkError::WriteFailure(format!("{}: {err}", output.as_ref().display()))
    })?;

    let metrics =
        CompressionMetrics::new(request.level, data.len() as u64, compressed.len() as u64);
    info!(
        original = metrics.original_size,
        compressed = metrics.compressed_size,
        ratio = metrics.compression_ratio,
        "PDF compressed"
    );
    Ok(metrics)
}

fn repack(document: &mut Document, level: CompressionLevel) {
    if level == CompressionLevel::Low {
        return;
    }

    if level == CompressionLevel::High {
        strip_non_rendering(document);
    }

    let pruned = document.prune_objects();
    let empty = document.delete_zero_length_streams();
    document.renumber_objects();
    document.compress();

    debug!(
        pruned = pruned.len(),
        empty_streams = empty.len(),
        objects = document.objects.len(),
        "object graph re-packed"
    );
}

/// Remove data viewers do not need to render pages: `/Thumb` on every page
/// and `/Metadata` on the catalog. The orphaned objects are pruned afterwards.
fn strip_non_rendering(document: &mut Document) {
    let page_ids: Vec<_> = document.get_pages().into_values().collect();
    let mut thumbs = 0usize;
    for page_id in page_ids {
        if let Ok(Object::Dictionary(page)) = document.get_object_mut(page_id)
            && page.remove(b"Thumb").is_some()
        {
            thumbs += 1;
        }
    }

    let root_id = document
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .ok();
    let mut metadata = false;
    if let Some(root_id) = root_id
        && let Ok(Object::Dictionary(catalog)) = document.get_object_mut(root_id)
    {
        metadata = catalog.remove(b"Metadata").is_some();
    }

    debug!(thumbs, metadata, "non-rendering data stripped");
}
