// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structure-preserving conversion of word-processor documents.
//
// Converters are synchronous; the pipeline runs them on the blocking pool
// and races them against a timer. A converter that overruns is abandoned,
// not cancelled.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use roxmltree::Node;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::{DocumentFormat, ElementKind, PaperSize};
use tracing::{debug, instrument, warn};
use zip::ZipArchive;

use crate::pdf::writer::{Block, PdfWriter};

/// Output of a successful native conversion.
#[derive(Debug, Clone)]
pub struct NativeOutput {
    pub pdf: Vec<u8>,
    pub page_count: usize,
    pub preserved: Vec<ElementKind>,
    pub lost: Vec<ElementKind>,
    pub warnings: Vec<String>,
}

pub trait NativeConverter: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, format: DocumentFormat) -> bool;

    fn convert(&self, bytes: &[u8], paper: PaperSize) -> Result<NativeOutput>;
}

/// Run `converter` on the blocking pool, giving up after `timeout`.
#[instrument(skip_all, fields(converter = converter.name(), timeout_ms = timeout.as_millis() as u64))]
pub async fn run_native(
    converter: Arc<dyn NativeConverter>,
    bytes: Arc<[u8]>,
    paper: PaperSize,
    timeout: Duration,
) -> Result<NativeOutput> {
    let task = tokio::task::spawn_blocking(move || converter.convert(&bytes, paper));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(TilemarkError::Timeout(timeout.as_millis() as u64)),
        Ok(Err(join)) => Err(TilemarkError::ConversionDegraded(format!(
            "native converter aborted: {join}"
        ))),
        Ok(Ok(result)) => result,
    }
}

// -- DOCX ---------------------------------------------------------------------

const DOCUMENT_PART: &str = "word/document.xml";

/// Parsed body of a WordprocessingML document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DocxBody {
    pub blocks: Vec<Block>,
    pub image_count: usize,
}

impl DocxBody {
    /// All text, one block per line, table cells joined by tabs.
    pub fn plain_text(&self) -> String {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Heading(t) | Block::Paragraph(t) => out.push(t.clone()),
                Block::Table(rows) => out.extend(rows.iter().map(|r| r.join("\t"))),
            }
        }
        out.join("\n")
    }

    pub fn has_text(&self) -> bool {
        self.blocks.iter().any(|b| match b {
            Block::Heading(t) | Block::Paragraph(t) => !t.trim().is_empty(),
            Block::Table(rows) => rows.iter().flatten().any(|c| !c.trim().is_empty()),
        })
    }
}

/// Read `word/document.xml` out of a DOCX container.
pub fn read_document_part(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| TilemarkError::ConversionDegraded(format!("not a readable archive: {e}")))?;
    let mut part = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| TilemarkError::ConversionDegraded(format!("{DOCUMENT_PART}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| TilemarkError::ConversionDegraded(format!("{DOCUMENT_PART}: {e}")))?;
    Ok(xml)
}

/// Parse the body of a WordprocessingML document.
pub fn parse_document_xml(xml: &str) -> Result<DocxBody> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| TilemarkError::ConversionDegraded(format!("malformed document XML: {e}")))?;
    let Some(body) = doc
        .root_element()
        .children()
        .find(|n| n.tag_name().name() == "body")
    else {
        return Err(TilemarkError::ConversionDegraded("document has no body".into()));
    };

    let mut parsed = DocxBody::default();
    for node in body.children().filter(Node::is_element) {
        match node.tag_name().name() {
            "p" => {
                let text = run_text(node);
                if is_heading(node) {
                    parsed.blocks.push(Block::Heading(text));
                } else {
                    parsed.blocks.push(Block::Paragraph(text));
                }
            }
            "tbl" => {
                let rows = node
                    .descendants()
                    .filter(|n| n.tag_name().name() == "tr")
                    .map(|row| {
                        row.children()
                            .filter(|c| c.tag_name().name() == "tc")
                            .map(run_text)
                            .collect::<Vec<_>>()
                    })
                    .collect();
                parsed.blocks.push(Block::Table(rows));
            }
            _ => {}
        }
    }
    parsed.image_count = body
        .descendants()
        .filter(|n| matches!(n.tag_name().name(), "drawing" | "pict"))
        .count();
    Ok(parsed)
}

fn is_heading(paragraph: Node<'_, '_>) -> bool {
    paragraph
        .descendants()
        .find(|n| n.tag_name().name() == "pStyle")
        .and_then(|style| {
            style
                .attributes()
                .find(|a| a.name() == "val")
                .map(|a| a.value().to_string())
        })
        .is_some_and(|val| val.starts_with("Heading") || val == "Title")
}

/// Concatenated run text with tabs and breaks, in document order.
fn run_text(node: Node<'_, '_>) -> String {
    let mut text = String::new();
    for n in node.descendants() {
        match n.tag_name().name() {
            "t" => text.push_str(n.text().unwrap_or_default()),
            "tab" => text.push('\t'),
            "br" | "cr" => text.push('\n'),
            _ => {}
        }
    }
    text
}

/// Lays DOCX paragraphs, headings and tables out as a new PDF.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxLayoutConverter;

impl NativeConverter for DocxLayoutConverter {
    fn name(&self) -> &str {
        "docx-layout"
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Docx
    }

    fn convert(&self, bytes: &[u8], paper: PaperSize) -> Result<NativeOutput> {
        let body = parse_document_xml(&read_document_part(bytes)?)?;
        if !body.has_text() {
            return Err(TilemarkError::ConversionDegraded(
                "document body has no text".into(),
            ));
        }

        let mut preserved = vec![ElementKind::Paragraphs];
        if body.blocks.iter().any(|b| matches!(b, Block::Heading(_))) {
            preserved.push(ElementKind::Headings);
        }
        if body.blocks.iter().any(|b| matches!(b, Block::Table(_))) {
            preserved.push(ElementKind::Tables);
        }

        let mut lost = vec![ElementKind::Layout];
        let mut warnings = Vec::new();
        if body.image_count > 0 {
            lost.push(ElementKind::Images);
            warnings.push(format!("{} embedded image(s) not carried over", body.image_count));
            warn!(images = body.image_count, "embedded images dropped");
        }

        let written = PdfWriter::new(paper).create_from_blocks(&body.blocks);
        debug!(
            blocks = body.blocks.len(),
            pages = written.page_count,
            "docx laid out"
        );
        Ok(NativeOutput {
            pdf: written.bytes,
            page_count: written.page_count,
            preserved,
            lost,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{docx, document_xml};

    #[test]
    fn parses_headings_paragraphs_and_tables() {
        let body = parse_document_xml(&document_xml(&["First point", "Second point"])).unwrap();
        assert_eq!(body.blocks[0], Block::Heading("Quarterly Report".into()));
        assert_eq!(body.blocks[1], Block::Paragraph("First point".into()));
        assert_eq!(
            body.blocks[3],
            Block::Table(vec![
                vec!["Region".into(), "Total".into()],
                vec!["North".into(), "42".into()],
            ])
        );
        assert!(body.plain_text().contains("North\t42"));
        assert_eq!(body.image_count, 0);
    }

    #[test]
    fn docx_converts_with_preserved_structure() {
        let out = DocxLayoutConverter
            .convert(&docx(&["Body text"]), PaperSize::A4)
            .unwrap();
        assert_eq!(out.page_count, 1);
        assert!(out.preserved.contains(&ElementKind::Headings));
        assert!(out.preserved.contains(&ElementKind::Tables));
        assert!(out.pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn corrupt_container_degrades() {
        let err = DocxLayoutConverter
            .convert(b"PK\x03\x04 broken", PaperSize::A4)
            .unwrap_err();
        assert!(matches!(err, TilemarkError::ConversionDegraded(_)));
    }

    struct Sleeper;

    impl NativeConverter for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }
        fn supports(&self, _: DocumentFormat) -> bool {
            true
        }
        fn convert(&self, _: &[u8], _: PaperSize) -> Result<NativeOutput> {
            std::thread::sleep(Duration::from_millis(500));
            Err(TilemarkError::ConversionDegraded("too late".into()))
        }
    }

    #[tokio::test]
    async fn overrunning_converter_times_out() {
        let err = run_native(
            Arc::new(Sleeper),
            Arc::from(&b"x"[..]),
            PaperSize::A4,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TilemarkError::Timeout(20)));
    }
}
