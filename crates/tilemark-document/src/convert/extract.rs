// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text extraction tiers.
//
// Tier 1 parses the container properly. Tier 2 ignores the central
// directory, walks local file headers and inflates whatever it can, over
// several offset/truncation variants of the input. Only non-empty text is
// accepted from either tier.

use std::fmt;
use std::io::{Cursor, Read};

use flate2::read::DeflateDecoder;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::DocumentFormat;
use tracing::{debug, instrument};
use zip::ZipArchive;

use super::native::{parse_document_xml, read_document_part};

const LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const LOCAL_HEADER_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Structured,
    Recovered,
}

/// Byte-level view of the input tried by tier 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Full,
    SkipLeading(usize),
    TruncatedPercent(usize),
}

impl Variant {
    pub const ALL: [Variant; 8] = [
        Variant::Full,
        Variant::SkipLeading(1),
        Variant::SkipLeading(2),
        Variant::SkipLeading(3),
        Variant::SkipLeading(4),
        Variant::TruncatedPercent(95),
        Variant::TruncatedPercent(90),
        Variant::TruncatedPercent(75),
    ];

    fn apply(self, bytes: &[u8]) -> &[u8] {
        match self {
            Self::Full => bytes,
            Self::SkipLeading(n) => bytes.get(n..).unwrap_or_default(),
            Self::TruncatedPercent(p) => &bytes[..bytes.len() * p / 100],
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::SkipLeading(n) => write!(f, "skip {n}"),
            Self::TruncatedPercent(p) => write!(f, "truncated to {p}%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub tier: ExtractionTier,
    /// Set for tier 2.
    pub variant: Option<Variant>,
}

/// Run tiers 1 and 2. `ExtractionFailed` when both come back empty.
#[instrument(skip(bytes), fields(bytes_len = bytes.len()))]
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<Extracted> {
    if let Some(text) = structured_text(bytes, format) {
        debug!(chars = text.len(), "tier 1 extraction succeeded");
        return Ok(Extracted {
            text,
            tier: ExtractionTier::Structured,
            variant: None,
        });
    }
    if let Some((text, variant)) = recover_text(bytes) {
        debug!(chars = text.len(), %variant, "tier 2 extraction succeeded");
        return Ok(Extracted {
            text,
            tier: ExtractionTier::Recovered,
            variant: Some(variant),
        });
    }
    Err(TilemarkError::ExtractionFailed(format!(
        "no text recovered from {format:?} input"
    )))
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// -- Tier 1 -------------------------------------------------------------------

/// Format-aware parse of the whole input.
pub fn structured_text(bytes: &[u8], format: DocumentFormat) -> Option<String> {
    match format {
        DocumentFormat::Docx => docx_text(bytes),
        DocumentFormat::Odt => odt_text(bytes),
        DocumentFormat::PlainText => non_empty(String::from_utf8_lossy(bytes).into_owned()),
        DocumentFormat::Rtf => non_empty(strip_rtf(&String::from_utf8_lossy(bytes))),
        DocumentFormat::Zip | DocumentFormat::Unknown => {
            docx_text(bytes).or_else(|| odt_text(bytes))
        }
        _ => None,
    }
}

fn docx_text(bytes: &[u8]) -> Option<String> {
    let xml = read_document_part(bytes).ok()?;
    let body = parse_document_xml(&xml).ok()?;
    non_empty(body.plain_text())
}

fn odt_text(bytes: &[u8]) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut xml = String::new();
    archive.by_name("content.xml").ok()?.read_to_string(&mut xml).ok()?;
    let doc = roxmltree::Document::parse(&xml).ok()?;
    let lines: Vec<String> = doc
        .descendants()
        .filter(|n| matches!(n.tag_name().name(), "p" | "h"))
        .map(|n| {
            n.descendants()
                .filter(|d| d.is_text())
                .filter_map(|d| d.text())
                .collect::<String>()
        })
        .collect();
    non_empty(lines.join("\n"))
}

/// Drop RTF control words and destination groups, keep the text.
pub fn strip_rtf(rtf: &str) -> String {
    const SKIPPED: &[&str] = &["fonttbl", "colortbl", "stylesheet", "info", "pict", "header", "footer"];

    let mut out = String::new();
    let mut depth = 0usize;
    let mut skip_below: Option<usize> = None;
    let mut chars = rtf.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => depth += 1,
            '}' => {
                if skip_below == Some(depth) {
                    skip_below = None;
                }
                depth = depth.saturating_sub(1);
            }
            '\\' => match chars.peek().copied() {
                Some(escaped @ ('\\' | '{' | '}')) => {
                    chars.next();
                    if skip_below.is_none() {
                        out.push(escaped);
                    }
                }
                Some('\'') => {
                    chars.next();
                    let hex: String = chars.by_ref().take(2).collect();
                    if skip_below.is_none()
                        && let Ok(byte) = u8::from_str_radix(&hex, 16)
                    {
                        out.push(char::from(byte));
                    }
                }
                Some('*') => {
                    chars.next();
                    skip_below.get_or_insert(depth);
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphabetic() {
                            word.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    while let Some(&ch) = chars.peek() {
                        if ch == '-' || ch.is_ascii_digit() {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if chars.peek() == Some(&' ') {
                        chars.next();
                    }
                    if SKIPPED.contains(&word.as_str()) {
                        skip_below.get_or_insert(depth);
                    } else if skip_below.is_none() {
                        match word.as_str() {
                            "par" | "line" => out.push('\n'),
                            "tab" => out.push('\t'),
                            _ => {}
                        }
                    }
                }
            },
            '\r' | '\n' => {}
            other => {
                if skip_below.is_none() {
                    out.push(other);
                }
            }
        }
    }
    out
}

// -- Tier 2 -------------------------------------------------------------------

/// Try each variant until one yields text from a main document part.
pub fn recover_text(bytes: &[u8]) -> Option<(String, Variant)> {
    Variant::ALL.into_iter().find_map(|variant| {
        let data = variant.apply(bytes);
        let text: Vec<String> = scan_local_entries(data)
            .into_iter()
            .filter(|(name, _)| is_main_part(name))
            .filter_map(|(_, payload)| non_empty(strip_markup(&String::from_utf8_lossy(&payload))))
            .collect();
        non_empty(text.join("\n")).map(|t| (t, variant))
    })
}

fn is_main_part(name: &str) -> bool {
    name.ends_with("document.xml") || name == "content.xml"
}

fn le_u16(data: &[u8], at: usize) -> Option<usize> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
}

fn le_u32(data: &[u8], at: usize) -> Option<usize> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
}

/// Every local file entry found by signature, with as much payload as could
/// be inflated.
pub fn scan_local_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while let Some(found) = find(&data[offset..], LOCAL_HEADER) {
        let at = offset + found;
        offset = at + LOCAL_HEADER.len();
        let header = (
            le_u16(data, at + 8),
            le_u32(data, at + 18),
            le_u16(data, at + 26),
            le_u16(data, at + 28),
        );
        // A damaged header is skipped; the next signature may still be good.
        let (Some(method), Some(compressed), Some(name_len), Some(extra_len)) = header else {
            continue;
        };
        let name_start = at + LOCAL_HEADER_LEN;
        let Some(name) = data.get(name_start..name_start + name_len) else {
            continue;
        };
        let start = name_start + name_len + extra_len;
        if start > data.len() {
            continue;
        }
        // Zero size means a trailing data descriptor; read to the end.
        let end = if compressed > 0 {
            (start + compressed).min(data.len())
        } else {
            data.len()
        };
        let raw = &data[start..end];
        let payload = match method {
            0 => raw.to_vec(),
            8 => inflate_lenient(raw),
            _ => continue,
        };
        entries.push((String::from_utf8_lossy(name).into_owned(), payload));
    }
    entries
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Inflate raw deflate data, keeping whatever decoded before an error.
fn inflate_lenient(data: &[u8]) -> Vec<u8> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

/// Tags out, paragraph ends to newlines, common entities decoded.
pub fn strip_markup(xml: &str) -> String {
    let mut out = String::new();
    let mut tag = String::new();
    let mut in_tag = false;
    for c in xml.chars() {
        match (in_tag, c) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                if matches!(tag.as_str(), "/w:p" | "/text:p" | "/text:h") {
                    out.push('\n');
                } else if matches!(tag.as_str(), "w:tab/" | "w:tab") {
                    out.push('\t');
                }
            }
            (true, _) => tag.push(c),
            (false, _) => out.push(c),
        }
    }
    let decoded = decode_entities(&out);
    decoded
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.bytes().take(12).position(|b| b == b';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{docx, document_xml, odt, zip_with};

    fn without_central_directory(mut bytes: Vec<u8>) -> Vec<u8> {
        let cut = find(&bytes, b"PK\x01\x02").unwrap();
        bytes.truncate(cut);
        bytes
    }

    #[test]
    fn tier_one_reads_docx_and_odt() {
        let got = extract(&docx(&["Hello there"]), DocumentFormat::Docx).unwrap();
        assert_eq!(got.tier, ExtractionTier::Structured);
        assert!(got.text.contains("Hello there"));

        let got = extract(&odt("Open document text"), DocumentFormat::Odt).unwrap();
        assert_eq!(got.text, "Open document text");
    }

    #[test]
    fn tier_two_recovers_from_a_broken_archive() {
        let broken = without_central_directory(docx(&["Recovered paragraph"]));
        assert!(structured_text(&broken, DocumentFormat::Docx).is_none());

        let got = extract(&broken, DocumentFormat::Docx).unwrap();
        assert_eq!(got.tier, ExtractionTier::Recovered);
        assert_eq!(got.variant, Some(Variant::Full));
        assert!(got.text.contains("Recovered paragraph"));
        assert!(got.text.contains("Quarterly Report"));
    }

    fn damage_name_length(bytes: &mut [u8], header_index: usize) {
        let mut at = 0;
        for _ in 0..=header_index {
            at += find(&bytes[at..], LOCAL_HEADER).unwrap();
            at += LOCAL_HEADER.len();
        }
        let header = at - LOCAL_HEADER.len();
        bytes[header + 26..header + 28].copy_from_slice(&[0xFF, 0xFF]);
    }

    fn entry_names(data: &[u8]) -> Vec<String> {
        scan_local_entries(data).into_iter().map(|(name, _)| name).collect()
    }

    #[test]
    fn damaged_first_header_does_not_end_the_scan() {
        let mut broken = without_central_directory(docx(&["Recovered paragraph"]));
        damage_name_length(&mut broken, 0);
        assert_eq!(entry_names(&broken), vec!["word/document.xml"]);

        let got = extract(&broken, DocumentFormat::Docx).unwrap();
        assert_eq!(got.tier, ExtractionTier::Recovered);
        assert_eq!(got.variant, Some(Variant::Full));
        assert!(got.text.starts_with("Quarterly Report\nRecovered paragraph"));

        // Dropping the damaged signature gets to the same place.
        let (text, _) = recover_text(&broken[1..]).unwrap();
        assert_eq!(text, got.text);
    }

    #[test]
    fn damaged_middle_header_is_skipped() {
        let mut broken = without_central_directory(zip_with(&[
            ("[Content_Types].xml", "<Types/>".to_string()),
            ("docProps/app.xml", "<Properties/>".to_string()),
            ("word/document.xml", document_xml(&["Still here"])),
        ]));
        damage_name_length(&mut broken, 1);
        assert_eq!(
            entry_names(&broken),
            vec!["[Content_Types].xml", "word/document.xml"]
        );
        assert!(recover_text(&broken).unwrap().0.contains("Still here"));
    }

    #[test]
    fn garbage_fails_extraction() {
        let err = extract(&[0x00, 0xFF, 0x13, 0x37], DocumentFormat::Unknown).unwrap_err();
        assert!(matches!(err, TilemarkError::ExtractionFailed(_)));
        assert!(extract(b"   \n  ", DocumentFormat::PlainText).is_err());
    }

    #[test]
    fn rtf_control_words_are_stripped() {
        let rtf = r"{\rtf1\ansi{\fonttbl{\f0 Arial;}}{\*\generator Writer;}\f0 Hello\par caf\'e9 \{x\}}";
        assert_eq!(strip_rtf(rtf), "Hello\ncafé {x}");
    }

    #[test]
    fn markup_and_entities() {
        let xml = "<w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p><w:p><w:t>&#169; &lt;2026&gt;</w:t></w:p>";
        assert_eq!(strip_markup(xml), "Fish & chips\n© <2026>");
    }

    #[test]
    fn variants_slice_as_described() {
        let data = [0u8; 100];
        assert_eq!(Variant::SkipLeading(3).apply(&data).len(), 97);
        assert_eq!(Variant::TruncatedPercent(75).apply(&data).len(), 75);
        assert_eq!(Variant::SkipLeading(3).to_string(), "skip 3");
    }
}
