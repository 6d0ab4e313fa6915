// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF target: marks become one shared image XObject (with an SMask for
// alpha) drawn by an appended content stream on each page. Existing page
// content is wrapped in q/Q so its graphics state cannot leak into ours.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tilemark_core::config::MergeConfig;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::mark::{GridLayout, Placement, Size};
use tracing::{debug, warn};

use super::{MergeMark, MergeReport, order_placements};
use crate::grid::layout;
use crate::pdf::reader::PdfReader;

const IMAGE_NAME: &str = "TmMark";
const FONT_NAME: &str = "TmHelv";

pub fn merge_pdf(
    bytes: &[u8],
    mark: &MergeMark,
    grid: &GridLayout,
    config: &MergeConfig,
) -> Result<(Vec<u8>, MergeReport)> {
    let reader = PdfReader::from_bytes(bytes)?;
    let pages: Vec<(ObjectId, Size)> = reader
        .page_ids()
        .into_iter()
        .map(|id| (id, reader.page_size(id)))
        .collect();
    let mut doc = reader.into_document();

    let mark_size = mark.size_pt();
    let image = embed_image(&mut doc, &mark.png);
    let mut font: Option<ObjectId> = None;
    let mut report = MergeReport {
        pages: pages.len(),
        ..MergeReport::default()
    };

    for (index, (page_id, page_size)) in pages.into_iter().enumerate() {
        let mut placements = layout(page_size, mark_size, grid)?;
        order_placements(&mut placements, config.strategy, index);

        let mut states: BTreeMap<String, f32> = BTreeMap::new();
        let mut ops = String::new();
        match &image {
            Ok(_) => {
                for p in &placements {
                    let gs = state_name(&mut states, p.opacity);
                    ops.push_str(&image_op(p, mark_size, page_size.height, &gs));
                    report.placements_drawn += 1;
                }
            }
            Err(reason) => {
                let failure = TilemarkError::MergeImageFailed {
                    page: index + 1,
                    reason: reason.clone(),
                };
                warn!(error = %failure, placements = placements.len(), "substituting text for mark");
                report.warnings.push(failure.to_string());
                font.get_or_insert_with(|| {
                    doc.add_object(dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                    })
                });
                for p in &placements {
                    let gs = state_name(&mut states, p.opacity);
                    ops.push_str(&text_op(p, mark_size, page_size.height, &gs, &mark.fallback_text));
                    report.substitutions += 1;
                }
            }
        }

        if placements.is_empty() {
            continue;
        }
        let resources = page_resources(&doc, page_id);
        let resources = extend_resources(&doc, resources, image.as_ref().ok(), font, &states);
        append_content(&mut doc, page_id, resources, ops.into_bytes())?;
        debug!(page = index + 1, placements = placements.len(), "page merged");
    }

    if config.compress_output {
        doc.compress();
    }
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|err| TilemarkError::PdfError(format!("failed to serialise merged PDF: {err}")))?;
    report.bytes = output.len();
    Ok((output, report))
}

// -- Embedding ----------------------------------------------------------------

fn zlib(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Add the mark as an RGB image XObject with a greyscale soft mask.
fn embed_image(doc: &mut Document, png: &[u8]) -> std::result::Result<ObjectId, String> {
    let rgba = image::load_from_memory(png)
        .map_err(|e| format!("mark image undecodable: {e}"))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(rgba.len() / 4);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }
    let rgb = zlib(&rgb).map_err(|e| e.to_string())?;
    let alpha = zlib(&alpha).map_err(|e| e.to_string())?;

    let smask = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        alpha,
    ));
    Ok(doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "SMask" => smask,
        },
        rgb,
    )))
}

// -- Content ------------------------------------------------------------------

/// Compact decimal for content streams.
fn num(v: f32) -> String {
    let v = if v.abs() < 5e-4 { 0.0 } else { v };
    let s = format!("{v:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// One ExtGState per distinct opacity, named by per-mille.
fn state_name(states: &mut BTreeMap<String, f32>, opacity: f32) -> String {
    let permille = (opacity.clamp(0.0, 1.0) * 1000.0).round() as u32;
    let name = format!("TmGS{permille}");
    states.entry(name.clone()).or_insert(permille as f32 / 1000.0);
    name
}

/// Unit-square image matrix for `p`, rotated about its centre.
///
/// Placements are top-left origin; PDF user space is bottom-left.
pub fn placement_matrix(p: &Placement, mark: Size, page_height: f32) -> [f32; 6] {
    let (w, h) = (mark.width, mark.height);
    let pdf_y = page_height - p.y - h;
    let (cx, cy) = (p.x + w / 2.0, pdf_y + h / 2.0);
    let (sin, cos) = p.rotation_offset.to_radians().sin_cos();
    let (a, b, c, d) = (w * cos, w * sin, -h * sin, h * cos);
    [a, b, c, d, cx - (a + c) / 2.0, cy - (b + d) / 2.0]
}

fn image_op(p: &Placement, mark: Size, page_height: f32, gs: &str) -> String {
    let m = placement_matrix(p, mark, page_height);
    format!(
        "q /{gs} gs {} {} {} {} {} {} cm /{IMAGE_NAME} Do Q\n",
        num(m[0]),
        num(m[1]),
        num(m[2]),
        num(m[3]),
        num(m[4]),
        num(m[5])
    )
}

fn escape_pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn text_op(p: &Placement, mark: Size, page_height: f32, gs: &str, text: &str) -> String {
    let size = (mark.height * 0.6).clamp(6.0, 48.0);
    let pdf_y = page_height - p.y - mark.height;
    let baseline = pdf_y + (mark.height - size) / 2.0;
    format!(
        "q /{gs} gs 0.5 g BT /{FONT_NAME} {} Tf 1 0 0 1 {} {} Tm ({}) Tj ET Q\n",
        num(size),
        num(p.x),
        num(baseline),
        escape_pdf_string(text)
    )
}

// -- Page plumbing ------------------------------------------------------------

fn resolve_dict(doc: &Document, object: Option<&Object>) -> Dictionary {
    match object {
        Some(Object::Dictionary(dict)) => dict.clone(),
        Some(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

/// The page's effective resources as an owned dictionary.
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    resolve_dict(doc, crate::pdf::reader::inherited(doc, page_id, b"Resources"))
}

fn extend_resources(
    doc: &Document,
    mut resources: Dictionary,
    image: Option<&ObjectId>,
    font: Option<ObjectId>,
    states: &BTreeMap<String, f32>,
) -> Dictionary {
    if let Some(image) = image {
        let mut xobjects = resolve_dict(doc, resources.get(b"XObject").ok());
        xobjects.set(IMAGE_NAME, Object::Reference(*image));
        resources.set("XObject", xobjects);
    }
    if let Some(font) = font {
        let mut fonts = resolve_dict(doc, resources.get(b"Font").ok());
        fonts.set(FONT_NAME, Object::Reference(font));
        resources.set("Font", fonts);
    }
    let mut ext = resolve_dict(doc, resources.get(b"ExtGState").ok());
    for (name, opacity) in states {
        ext.set(
            name.as_str(),
            dictionary! {
                "Type" => "ExtGState",
                "ca" => *opacity,
                "CA" => *opacity,
            },
        );
    }
    resources.set("ExtGState", ext);
    resources
}

fn append_content(
    doc: &mut Document,
    page_id: ObjectId,
    resources: Dictionary,
    marks: Vec<u8>,
) -> Result<()> {
    let existing: Vec<Object> = match doc
        .get_dictionary(page_id)
        .map_err(|e| TilemarkError::PdfError(format!("page {page_id:?}: {e}")))?
        .get(b"Contents")
    {
        Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let open = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let mut body = b"\nQ\n".to_vec();
    body.extend_from_slice(&marks);
    let close = doc.add_object(Stream::new(dictionary! {}, body));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open));
    contents.extend(existing);
    contents.push(Object::Reference(close));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| TilemarkError::PdfError(format!("page {page_id:?}: {e}")))?;
    page.set("Contents", contents);
    page.set("Resources", resources);
    Ok(())
}
