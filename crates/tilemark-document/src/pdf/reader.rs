// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader: load existing documents with `lopdf` and answer the page
// questions the merger needs (page order, MediaBox).

use lopdf::{Document, Object, ObjectId};
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::mark::Size;
use tilemark_core::types::PaperSize;
use tracing::{debug, instrument, warn};

/// Parent chains deeper than this are treated as malformed.
const MAX_INHERITANCE_DEPTH: usize = 32;

pub struct PdfReader {
    document: Document,
}

impl PdfReader {
    /// Load a PDF already in memory.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data)
            .map_err(|err| TilemarkError::PdfError(format!("failed to load PDF: {err}")))?;
        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");
        Ok(Self { document })
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Page object ids in reading order.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        self.document.get_pages().into_values().collect()
    }

    /// Page size in points from `/MediaBox`, following `/Parent` inheritance.
    ///
    /// Pages without a readable box are treated as A4.
    pub fn page_size(&self, page_id: ObjectId) -> Size {
        match media_box(&self.document, page_id) {
            Some(size) => size,
            None => {
                warn!(?page_id, "no usable MediaBox, assuming A4");
                let (w, h) = PaperSize::A4.dimensions_pt();
                Size::new(w, h)
            }
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Look `key` up on the page, then on each ancestor in the page tree.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<Size> {
    let mut object = inherited(doc, page_id, b"MediaBox")?;
    if let Object::Reference(id) = object {
        object = doc.get_object(*id).ok()?;
    }
    let values: Vec<f32> = object.as_array().ok()?.iter().filter_map(number).collect();
    let [x0, y0, x1, y1] = values.as_slice() else {
        return None;
    };
    let size = Size::new((x1 - x0).abs(), (y1 - y0).abs());
    (size.width > 0.0 && size.height > 0.0).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::two_page_pdf;

    #[test]
    fn reads_pages_and_inherited_boxes() {
        let reader = PdfReader::from_bytes(&two_page_pdf()).unwrap();
        assert_eq!(reader.page_count(), 2);
        let ids = reader.page_ids();
        assert_eq!(reader.page_size(ids[0]), Size::new(300.0, 200.0));
        assert_eq!(reader.page_size(ids[1]), Size::new(612.0, 792.0));
    }

    #[test]
    fn garbage_is_a_pdf_error() {
        assert!(matches!(
            PdfReader::from_bytes(b"%PDF-1.4 nothing else"),
            Err(TilemarkError::PdfError(_))
        ));
    }
}
