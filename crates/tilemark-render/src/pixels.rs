// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversions between tiny-skia's premultiplied pixmaps and `image` buffers.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};
use tilemark_core::error::{Result, TilemarkError};
use tiny_skia::Pixmap;

/// Straight-alpha RGBA copy of a pixmap.
pub fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage> {
    let mut buf = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let c = pixel.demultiply();
        buf.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), buf)
        .ok_or_else(|| TilemarkError::RenderError("pixmap buffer size mismatch".into()))
}

/// Premultiplied pixmap from a straight-alpha RGBA image.
pub fn rgba_to_pixmap(image: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height()).ok_or_else(|| {
        TilemarkError::RenderError(format!(
            "cannot allocate {}x{} pixmap",
            image.width(),
            image.height()
        ))
    })?;
    for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        let premultiply = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
        dst.copy_from_slice(&[premultiply(r), premultiply(g), premultiply(b), a]);
    }
    Ok(pixmap)
}

/// Encode a pixmap as PNG.
pub fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>> {
    let rgba = pixmap_to_rgba(pixmap)?;
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| TilemarkError::ImageError(format!("PNG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

/// Decode any supported image into a premultiplied pixmap.
pub fn decode_to_pixmap(bytes: &[u8]) -> Result<Pixmap> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| TilemarkError::ImageError(format!("failed to decode image: {e}")))?;
    rgba_to_pixmap(&image.to_rgba8())
}
