// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Placeholder document for inputs nothing else could read, so the caller
// still gets a watermark-bearing artifact.

use chrono::{DateTime, SecondsFormat, Utc};
use tilemark_core::types::{DocumentFormat, PaperSize};

use crate::pdf::writer::{Block, PdfWriter, WrittenPdf};

/// Facts recorded on the placeholder page.
#[derive(Debug, Clone)]
pub struct PlaceholderInfo<'a> {
    pub filename: &'a str,
    pub size_bytes: usize,
    pub format: DocumentFormat,
    pub generated_at: DateTime<Utc>,
}

pub fn placeholder_blocks(info: &PlaceholderInfo<'_>) -> Vec<Block> {
    vec![
        Block::Heading("Document preview unavailable".into()),
        Block::Paragraph(String::new()),
        Block::Paragraph(format!("File: {}", info.filename)),
        Block::Paragraph(format!("Size: {} bytes", info.size_bytes)),
        Block::Paragraph(format!("Detected format: {:?}", info.format)),
        Block::Paragraph(format!(
            "Generated: {}",
            info.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )),
    ]
}

pub fn synthesize_placeholder(info: &PlaceholderInfo<'_>, paper: PaperSize) -> WrittenPdf {
    let mut writer = PdfWriter::new(paper);
    writer.set_title(format!("Placeholder for {}", info.filename));
    writer.create_from_blocks(&placeholder_blocks(info))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn placeholder_lists_the_facts() {
        let info = PlaceholderInfo {
            filename: "broken.docx",
            size_bytes: 1234,
            format: DocumentFormat::Docx,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        let blocks = placeholder_blocks(&info);
        assert!(blocks.contains(&Block::Paragraph("File: broken.docx".into())));
        assert!(blocks.contains(&Block::Paragraph("Size: 1234 bytes".into())));
        assert!(blocks.contains(&Block::Paragraph("Generated: 2026-03-01T12:00:00Z".into())));

        let pdf = synthesize_placeholder(&info, PaperSize::Letter);
        assert_eq!(pdf.page_count, 1);
        assert!(!pdf.bytes.is_empty());
    }
}
