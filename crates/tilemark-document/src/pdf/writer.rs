// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer: lay out text blocks onto new pages using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`.

use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem,
};
use tilemark_core::types::PaperSize;
use tracing::{debug, info, instrument};

const MARGIN_MM: f32 = 20.0;
const BODY_SIZE_PT: f32 = 11.0;
const HEADING_SIZE_PT: f32 = 16.0;
/// Average Helvetica advance as a fraction of the font size.
const AVG_CHAR_EM: f32 = 0.5;

/// One unit of flowed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    /// Rows of cells; cells are joined by tabs when laid out.
    Table(Vec<Vec<String>>),
}

/// Serialised PDF plus the number of pages it holds.
#[derive(Debug, Clone)]
pub struct WrittenPdf {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

struct Line {
    text: String,
    font: BuiltinFont,
    size: f32,
}

/// Creates new PDF documents from flowed text.
pub struct PdfWriter {
    paper_size: PaperSize,
    title: Option<String>,
}

impl PdfWriter {
    pub fn new(paper_size: PaperSize) -> Self {
        Self {
            paper_size,
            title: None,
        }
    }

    pub fn a4() -> Self {
        Self::new(PaperSize::A4)
    }

    /// Title metadata embedded in the PDF /Info dictionary.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    fn page_dimensions(&self) -> (Mm, Mm) {
        let (w_mm, h_mm) = self.paper_size.dimensions_mm();
        (Mm(w_mm as f32), Mm(h_mm as f32))
    }

    fn chars_per_line(&self, size_pt: f32) -> usize {
        let (page_w, _) = self.page_dimensions();
        let usable_width_mm = page_w.0 - 2.0 * MARGIN_MM;
        // 1pt = 0.3528mm
        let avg_char_width_mm = AVG_CHAR_EM * size_pt * 0.3528;
        ((usable_width_mm / avg_char_width_mm) as usize).max(1)
    }

    /// Plain text, one paragraph per input line.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn create_from_text(&self, text: &str) -> WrittenPdf {
        let blocks: Vec<Block> = text
            .split('\n')
            .map(|line| Block::Paragraph(line.to_string()))
            .collect();
        self.create_from_blocks(&blocks)
    }

    /// Headings, paragraphs and tables flowed top to bottom with automatic
    /// page breaks.
    #[instrument(skip_all, fields(blocks = blocks.len()))]
    pub fn create_from_blocks(&self, blocks: &[Block]) -> WrittenPdf {
        let (page_w, page_h) = self.page_dimensions();
        let title = self.title.as_deref().unwrap_or("Tilemark Document");
        info!(paper = ?self.paper_size, title, "creating PDF");

        let lines = self.flow(blocks);
        let margin_pt = Mm(MARGIN_MM).into_pt().0;
        let page_h_pt = page_h.into_pt().0;
        let bottom = margin_pt;

        let mut pages: Vec<PdfPage> = Vec::new();
        let mut ops: Vec<Op> = Vec::new();
        let mut cursor_y = page_h_pt - margin_pt;
        for line in &lines {
            let leading = line.size * 1.3;
            if cursor_y - leading < bottom && !ops.is_empty() {
                pages.push(PdfPage::new(page_w, page_h, std::mem::take(&mut ops)));
                cursor_y = page_h_pt - margin_pt;
            }
            cursor_y -= leading;
            if line.text.is_empty() {
                continue;
            }
            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextCursor {
                pos: Point {
                    x: Pt(margin_pt),
                    y: Pt(cursor_y),
                },
            });
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(line.size),
                font: line.font,
            });
            ops.push(Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(line.text.clone())],
                font: line.font,
            });
            ops.push(Op::EndTextSection);
        }
        if !ops.is_empty() || pages.is_empty() {
            pages.push(PdfPage::new(page_w, page_h, ops));
        }

        let page_count = pages.len();
        let mut doc = PdfDocument::new(title);
        doc.with_pages(pages);
        debug!(lines = lines.len(), page_count, "text layout complete");

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
        WrittenPdf { bytes, page_count }
    }

    fn flow(&self, blocks: &[Block]) -> Vec<Line> {
        let body_width = self.chars_per_line(BODY_SIZE_PT);
        let heading_width = self.chars_per_line(HEADING_SIZE_PT);
        let mut lines = Vec::new();
        let mut push = |text: String, font: BuiltinFont, size: f32| {
            lines.push(Line { text, font, size });
        };

        for block in blocks {
            match block {
                Block::Heading(text) => {
                    for line in wrap_text(text, heading_width) {
                        push(line, BuiltinFont::HelveticaBold, HEADING_SIZE_PT);
                    }
                }
                Block::Paragraph(text) => {
                    for line in wrap_text(text, body_width) {
                        push(line, BuiltinFont::Helvetica, BODY_SIZE_PT);
                    }
                }
                Block::Table(rows) => {
                    for row in rows {
                        for line in wrap_text(&row.join("\t"), body_width) {
                            push(line, BuiltinFont::Courier, BODY_SIZE_PT);
                        }
                    }
                    push(String::new(), BuiltinFont::Helvetica, BODY_SIZE_PT);
                }
            }
        }
        lines
    }
}

// -- Text wrapping helper -----------------------------------------------------

/// Wrap a multi-line string so that no line exceeds `max_width` characters.
///
/// Splits on existing newlines first, then word-wraps each paragraph. Words
/// longer than `max_width` are force-broken on character boundaries.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut result = Vec::new();

    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            result.push(String::new());
            continue;
        }

        let mut current = String::new();
        let mut current_len = 0usize;
        for word in words {
            let word_len = word.chars().count();
            if word_len > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(max_width).peekable();
                while let Some(chunk) = chunks.next() {
                    if chunks.peek().is_some() {
                        result.push(chunk.iter().collect());
                    } else {
                        current = chunk.iter().collect();
                        current_len = chunk.len();
                    }
                }
            } else if current.is_empty() {
                current.push_str(word);
                current_len = word_len;
            } else if current_len + 1 + word_len <= max_width {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
            } else {
                result.push(std::mem::replace(&mut current, word.to_string()));
                current_len = word_len;
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::reader::PdfReader;

    #[test]
    fn wraps_on_words_and_breaks_long_ones() {
        assert_eq!(
            wrap_text("the quick brown fox", 9),
            vec!["the quick", "brown fox"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
        assert_eq!(wrap_text("ünïcödé wörds", 7), vec!["ünïcödé", "wörds"]);
    }

    #[test]
    fn text_pdf_is_readable() {
        let written = PdfWriter::a4().create_from_text("hello\nworld");
        assert_eq!(written.page_count, 1);
        let reader = PdfReader::from_bytes(&written.bytes).unwrap();
        assert_eq!(reader.page_count(), 1);
    }

    #[test]
    fn long_content_breaks_pages() {
        let text = (0..200).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let written = PdfWriter::new(PaperSize::A5).create_from_text(&text);
        assert!(written.page_count > 1);
        let reader = PdfReader::from_bytes(&written.bytes).unwrap();
        assert_eq!(reader.page_count(), written.page_count);
    }

    #[test]
    fn empty_input_still_has_a_page() {
        assert_eq!(PdfWriter::a4().create_from_blocks(&[]).page_count, 1);
    }
}
