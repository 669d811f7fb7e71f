// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer — lay plain text onto fixed-size pages using `printpdf` 0.8.
//
// The layout is an approximation, not metric-accurate typesetting: a line's
// rendered width is estimated as `chars * glyph_width_factor * font_size`,
// words are packed greedily while that estimate stays under the usable width,
// and a new page starts when the baseline would drop below the bottom margin.

use std::path::Path;

use dokwerk_core::PaperSize;
use dokwerk_core::error::{DokwerkError, Result};
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem,
};
use tracing::{debug, info, instrument};

/// Typographic constants for the text re-flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextLayout {
    pub font_size_pt: f32,
    pub line_height_pt: f32,
    /// Same margin on all four sides.
    pub margin_pt: f32,
    /// Average glyph width as a fraction of the font size.
    pub glyph_width_factor: f32,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            font_size_pt: 12.0,
            line_height_pt: 14.4,
            margin_pt: 50.0,
            glyph_width_factor: 0.6,
        }
    }
}

impl TextLayout {
    /// Estimated rendered width of `chars` characters, in points.
    pub fn estimated_width(&self, chars: usize) -> f32 {
        chars as f32 * self.glyph_width_factor * self.font_size_pt
    }

    /// Largest character count whose estimated width stays under `width`.
    fn max_chars(&self, width: f32) -> usize {
        let glyph = self.glyph_width_factor * self.font_size_pt;
        ((width / glyph).ceil() as usize).saturating_sub(1).max(1)
    }
}

/// One line of text placed at a baseline position on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x_pt: f32,
    pub y_pt: f32,
}

/// Creates PDF documents from plain text.
pub struct PdfWriter {
    paper_size: PaperSize,
    layout: TextLayout,
    /// Title metadata embedded in the PDF /Info dictionary.
    title: Option<String>,
}

impl PdfWriter {
    pub fn new(paper_size: PaperSize) -> Self {
        Self {
            paper_size,
            layout: TextLayout::default(),
            title: None,
        }
    }

    /// Create a new writer defaulting to A4.
    pub fn a4() -> Self {
        Self::new(PaperSize::A4)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Paper dimensions in printpdf's Mm units.
    fn page_dimensions(&self) -> (Mm, Mm) {
        let (w_mm, h_mm) = self.paper_size.dimensions_mm();
        (Mm(w_mm as f32), Mm(h_mm as f32))
    }

    /// Lay `text` out into pages of placed lines without rendering anything.
    pub fn layout_pages(&self, text: &str) -> Vec<Vec<PlacedLine>> {
        let (page_w, page_h) = self.page_dimensions();
        let usable_width = page_w.into_pt().0 - 2.0 * self.layout.margin_pt;
        let lines = wrap_text(text, &self.layout, usable_width);
        paginate(lines, &self.layout, page_h.into_pt().0)
    }

    /// Render `text` as a PDF and return the serialised bytes.
    ///
    /// Uses the built-in Helvetica font, so only characters in its encoding
    /// render faithfully.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn create_from_text(&self, text: &str) -> Result<Vec<u8>> {
        let (page_w, page_h) = self.page_dimensions();
        let title = self.title.as_deref().unwrap_or("Dokwerk Document");

        info!(paper = ?self.paper_size, title, "Creating text PDF");

        let placed = self.layout_pages(text);
        let font_size = Pt(self.layout.font_size_pt);

        let pages: Vec<PdfPage> = placed
            .iter()
            .map(|lines| {
                let mut ops: Vec<Op> = Vec::with_capacity(lines.len() * 5);
                for line in lines.iter().filter(|l| !l.text.is_empty()) {
                    ops.push(Op::StartTextSection);
                    ops.push(Op::SetTextCursor {
                        pos: Point {
                            x: Pt(line.x_pt),
                            y: Pt(line.y_pt),
                        },
                    });
                    ops.push(Op::SetFontSizeBuiltinFont {
                        size: font_size,
                        font: BuiltinFont::Helvetica,
                    });
                    ops.push(Op::WriteTextBuiltinFont {
                        items: vec![TextItem::Text(line.text.clone())],
                        font: BuiltinFont::Helvetica,
                    });
                    ops.push(Op::EndTextSection);
                }
                PdfPage::new(page_w, page_h, ops)
            })
            .collect();

        let mut doc = PdfDocument::new(title);
        doc.with_pages(pages);

        debug!(pages = doc.pages.len(), "Text layout complete");

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            debug!(warnings = warnings.len(), "printpdf reported warnings");
        }

        Ok(output)
    }

    /// Render `text` and write the PDF to `path`.
    pub fn write_text_to_file(&self, text: &str, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.create_from_text(text)?;
        std::fs::write(path.as_ref(), &bytes).map_err(|err| {
            DokwerkError::WriteFailure(format!("{}: {err}", path.as_ref().display()))
        })?;
        info!("Wrote text PDF to {}", path.as_ref().display());
        Ok(())
    }
}

// -- Layout helpers -----------------------------------------------------------

/// Greedy word wrap against the estimated line width.
///
/// Newlines separate paragraphs; an empty paragraph yields a blank line.
/// Words that alone exceed the width are broken on character boundaries.
fn wrap_text(text: &str, layout: &TextLayout, usable_width: f32) -> Vec<String> {
    let max_chars = layout.max_chars(usable_width);
    let mut result = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_chars = 0usize;
        let mut any_word = false;

        for word in paragraph.split_whitespace() {
            any_word = true;
            let word_chars = word.chars().count();

            let candidate_chars = if current.is_empty() {
                word_chars
            } else {
                current_chars + 1 + word_chars
            };
            if layout.estimated_width(candidate_chars) < usable_width {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                current_chars = candidate_chars;
                continue;
            }

            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
                current_chars = 0;
            }

            if word_chars > max_chars {
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(max_chars).peekable();
                while let Some(chunk) = chunks.next() {
                    let piece: String = chunk.iter().collect();
                    if chunks.peek().is_some() {
                        result.push(piece);
                    } else {
                        current_chars = chunk.len();
                        current = piece;
                    }
                }
            } else {
                current.push_str(word);
                current_chars = word_chars;
            }
        }

        if !current.is_empty() {
            result.push(current);
        } else if !any_word {
            result.push(String::new());
        }
    }

    result
}

/// Assign baselines top-down, starting a new page whenever the next baseline
/// would fall below the bottom margin. Always returns at least one page.
fn paginate(lines: Vec<String>, layout: &TextLayout, page_height: f32) -> Vec<Vec<PlacedLine>> {
    let top = page_height - layout.margin_pt;
    let mut pages: Vec<Vec<PlacedLine>> = vec![Vec::new()];
    let mut y = top;

    for text in lines {
        if y < layout.margin_pt {
            pages.push(Vec::new());
            y = top;
        }
        if let Some(page) = pages.last_mut() {
            page.push(PlacedLine {
                text,
                x_pt: layout.margin_pt,
                y_pt: y,
            });
        }
        y -= layout.line_height_pt;
    }

    pages
}
