// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File-signature detection.
//
// Magic bytes win over the file extension. ZIP containers are inspected for
// the part names that distinguish DOCX and ODT from a plain archive.

use std::path::Path;

use tilemark_core::types::{Detection, DocumentFormat};
use tracing::debug;

/// Identifies a document's format from its bytes and (optionally) its name.
pub trait FormatDetector: Send + Sync {
    fn detect(&self, bytes: &[u8], filename: Option<&str>) -> Detection;
}

/// Signature-table detector used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureDetector;

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Match `bytes` against known signatures only.
pub fn sniff(bytes: &[u8]) -> Option<DocumentFormat> {
    let format = if bytes.starts_with(b"%PDF") {
        DocumentFormat::Pdf
    } else if bytes.starts_with(PNG_MAGIC) {
        DocumentFormat::Png
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        DocumentFormat::Jpeg
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        DocumentFormat::Gif
    } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
        DocumentFormat::Bmp
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        DocumentFormat::Tiff
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        DocumentFormat::Webp
    } else if bytes.starts_with(b"{\\rtf") {
        DocumentFormat::Rtf
    } else if bytes.starts_with(OLE_MAGIC) {
        DocumentFormat::Doc
    } else if bytes.starts_with(b"PK\x03\x04") {
        zip_flavour(bytes)
    } else {
        return None;
    };
    Some(format)
}

/// Tell DOCX and ODT apart from an ordinary archive by their part names.
fn zip_flavour(bytes: &[u8]) -> DocumentFormat {
    if contains(bytes, b"mimetypeapplication/vnd.oasis.opendocument.text") {
        DocumentFormat::Odt
    } else if contains(bytes, b"word/document.xml") || contains(bytes, b"word/_rels") {
        DocumentFormat::Docx
    } else {
        DocumentFormat::Zip
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Mostly printable UTF-8 in the first few KiB.
fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let head = &bytes[..bytes.len().min(4096)];
    let text = String::from_utf8_lossy(head);
    let total = text.chars().count().max(1);
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .count();
    printable as f32 / total as f32 > 0.95
}

impl FormatDetector for SignatureDetector {
    fn detect(&self, bytes: &[u8], filename: Option<&str>) -> Detection {
        let by_extension = filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .and_then(DocumentFormat::from_extension);

        let mut warnings = Vec::new();
        let (format, confidence) = match (sniff(bytes), by_extension) {
            (Some(DocumentFormat::Zip), Some(ext)) if ext.is_word_processor() => {
                warnings.push(format!(
                    "archive named as {ext:?} but its document part was not found"
                ));
                (ext, 0.5)
            }
            (Some(sniffed), ext) => {
                if let Some(ext) = ext
                    && ext != sniffed
                {
                    warnings.push(format!(
                        "extension suggests {ext:?} but content is {sniffed:?}"
                    ));
                }
                let confidence = match sniffed {
                    DocumentFormat::Docx | DocumentFormat::Odt => 0.9,
                    DocumentFormat::Zip => 0.8,
                    _ => 0.95,
                };
                (sniffed, confidence)
            }
            (None, Some(ext)) => {
                warnings.push("no known signature; trusting the file extension".into());
                (ext, 0.5)
            }
            (None, None) if looks_like_text(bytes) => (DocumentFormat::PlainText, 0.6),
            (None, None) => {
                warnings.push("unrecognised content".into());
                (DocumentFormat::Unknown, 0.0)
            }
        };

        debug!(?format, confidence, warnings = warnings.len(), "format detected");
        Detection {
            format,
            confidence,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures() {
        assert_eq!(sniff(b"%PDF-1.7\n"), Some(DocumentFormat::Pdf));
        assert_eq!(sniff(PNG_MAGIC), Some(DocumentFormat::Png));
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentFormat::Jpeg));
        assert_eq!(sniff(b"{\\rtf1\\ansi"), Some(DocumentFormat::Rtf));
        assert_eq!(sniff(b"hello"), None);
    }

    #[test]
    fn zip_part_names_pick_the_flavour() {
        let mut docx = b"PK\x03\x04".to_vec();
        docx.extend_from_slice(b"....word/document.xml....");
        assert_eq!(sniff(&docx), Some(DocumentFormat::Docx));

        let mut odt = b"PK\x03\x04".to_vec();
        odt.extend_from_slice(b"....mimetypeapplication/vnd.oasis.opendocument.text");
        assert_eq!(sniff(&odt), Some(DocumentFormat::Odt));

        assert_eq!(sniff(b"PK\x03\x04plain"), Some(DocumentFormat::Zip));
    }

    #[test]
    fn content_beats_extension_with_a_warning() {
        let d = SignatureDetector.detect(b"%PDF-1.4", Some("report.docx"));
        assert_eq!(d.format, DocumentFormat::Pdf);
        assert_eq!(d.warnings.len(), 1);
    }

    #[test]
    fn extension_and_text_fallbacks() {
        let d = SignatureDetector.detect(&[0, 1, 2, 3], Some("notes.docx"));
        assert_eq!(d.format, DocumentFormat::Docx);
        assert!(d.confidence < 0.9);

        let d = SignatureDetector.detect(b"plain words\nand lines", None);
        assert_eq!(d.format, DocumentFormat::PlainText);

        let d = SignatureDetector.detect(&[0, 159, 146, 150, 0, 1], None);
        assert_eq!(d.format, DocumentFormat::Unknown);
    }
}
