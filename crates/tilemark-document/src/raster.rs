// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster pages: decode an input image, hand its pixels to tiny-skia, and
// re-encode in the input's format.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::DocumentFormat;
use tilemark_render::{pixmap_to_rgba, rgba_to_pixmap};
use tiny_skia::Pixmap;
use tracing::{debug, instrument};

const JPEG_QUALITY: u8 = 90;

/// A decoded single-page raster document.
pub struct RasterPage {
    image: DynamicImage,
    format: DocumentFormat,
}

impl RasterPage {
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let guessed = image::guess_format(data)
            .map_err(|err| TilemarkError::ImageError(format!("unknown image format: {err}")))?;
        let image = image::load_from_memory_with_format(data, guessed)
            .map_err(|err| TilemarkError::ImageError(format!("failed to decode image: {err}")))?;
        let format = match guessed {
            ImageFormat::Png => DocumentFormat::Png,
            ImageFormat::Jpeg => DocumentFormat::Jpeg,
            ImageFormat::Gif => DocumentFormat::Gif,
            ImageFormat::Bmp => DocumentFormat::Bmp,
            ImageFormat::Tiff => DocumentFormat::Tiff,
            ImageFormat::WebP => DocumentFormat::Webp,
            _ => DocumentFormat::Unknown,
        };
        debug!(width = image.width(), height = image.height(), ?format, "raster decoded");
        Ok(Self { image, format })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Premultiplied copy for drawing.
    pub fn to_pixmap(&self) -> Result<Pixmap> {
        rgba_to_pixmap(&self.image.to_rgba8())
    }
}

/// Output format for a raster page: JPEG stays JPEG, everything else
/// becomes PNG.
pub fn output_format(input: DocumentFormat) -> DocumentFormat {
    match input {
        DocumentFormat::Jpeg => DocumentFormat::Jpeg,
        _ => DocumentFormat::Png,
    }
}

/// Encode a drawn page in the output format for `input`.
pub fn encode_page(pixmap: &Pixmap, input: DocumentFormat) -> Result<(Vec<u8>, DocumentFormat)> {
    let rgba = pixmap_to_rgba(pixmap)?;
    let format = output_format(input);
    let mut buffer = Vec::new();
    match format {
        DocumentFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
                .map_err(|err| TilemarkError::ImageError(format!("JPEG encoding failed: {err}")))?;
        }
        _ => {
            DynamicImage::ImageRgba8(rgba)
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
                .map_err(|err| TilemarkError::ImageError(format!("PNG encoding failed: {err}")))?;
        }
    }
    Ok((buffer, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::solid_image;

    #[test]
    fn jpeg_stays_jpeg_and_gif_becomes_png() {
        let jpeg = solid_image(8, 6, [200, 10, 10, 255], ImageFormat::Jpeg);
        let page = RasterPage::from_bytes(&jpeg).unwrap();
        assert_eq!((page.width(), page.height()), (8, 6));
        assert_eq!(page.format(), DocumentFormat::Jpeg);

        let (bytes, format) = encode_page(&page.to_pixmap().unwrap(), page.format()).unwrap();
        assert_eq!(format, DocumentFormat::Jpeg);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);

        assert_eq!(output_format(DocumentFormat::Gif), DocumentFormat::Png);
    }

    #[test]
    fn undecodable_input() {
        assert!(RasterPage::from_bytes(b"not an image").is_err());
    }
}
