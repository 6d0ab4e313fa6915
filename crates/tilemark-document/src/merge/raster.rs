// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster target: composite the mark onto the page pixels with tiny-skia.

use tilemark_core::error::Result;
use tilemark_core::mark::{GridLayout, LayerStrategy, Placement, Size};
use tilemark_core::types::DocumentFormat;
use tilemark_render::{FontBook, decode_to_pixmap, draw_text};
use tiny_skia::{FilterQuality, Paint, Pixmap, PixmapPaint, Transform};
use tracing::{debug, warn};

use super::{MergeMark, MergeReport, order_placements};
use crate::grid::layout;
use crate::raster::{RasterPage, encode_page};

pub fn merge_raster(
    bytes: &[u8],
    mark: &MergeMark,
    grid: &GridLayout,
    strategy: LayerStrategy,
    fonts: &FontBook,
) -> Result<(Vec<u8>, DocumentFormat, MergeReport)> {
    let page = RasterPage::from_bytes(bytes)?;
    let mut canvas = page.to_pixmap()?;
    let page_size = Size::new(page.width() as f32, page.height() as f32);
    let mark_size = mark.size_px();

    let mut placements = layout(page_size, mark_size, grid)?;
    order_placements(&mut placements, strategy, 0);

    let mut report = MergeReport {
        pages: 1,
        ..MergeReport::default()
    };
    match decode_to_pixmap(&mark.png) {
        Ok(image) => {
            for p in &placements {
                draw_mark(&mut canvas, &image, p, mark_size);
                report.placements_drawn += 1;
            }
        }
        Err(err) => {
            warn!(error = %err, placements = placements.len(), "substituting text for mark");
            report.warnings.push(format!("page 1: {err}"));
            let mut glyphs = 0;
            for p in &placements {
                glyphs += draw_substitute(&mut canvas, fonts, &mark.fallback_text, p, mark_size);
                report.substitutions += 1;
            }
            if glyphs == 0 && !placements.is_empty() {
                warn!("no registered font could draw the substitute text");
                report
                    .warnings
                    .push("page 1: no font available for substitute text".into());
            }
        }
    }

    let (bytes, format) = encode_page(&canvas, page.format())?;
    debug!(placements = placements.len(), ?format, "raster merged");
    report.bytes = bytes.len();
    Ok((bytes, format, report))
}

fn centred(p: &Placement, mark: Size) -> Transform {
    about_centre(p, mark).pre_translate(-mark.width / 2.0, -mark.height / 2.0)
}

/// Origin at the placement centre, turned by the placement's rotation.
fn about_centre(p: &Placement, mark: Size) -> Transform {
    Transform::from_translate(p.x + mark.width / 2.0, p.y + mark.height / 2.0)
        .pre_rotate(-p.rotation_offset)
}

fn draw_mark(canvas: &mut Pixmap, image: &Pixmap, p: &Placement, mark: Size) {
    let paint = PixmapPaint {
        opacity: p.opacity.clamp(0.0, 1.0),
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    canvas.draw_pixmap(0, 0, image.as_ref(), &paint, centred(p, mark), None);
}

/// Mid-grey text centred on the placement, sized like the PDF substitute.
fn draw_substitute(
    canvas: &mut Pixmap,
    fonts: &FontBook,
    text: &str,
    p: &Placement,
    mark: Size,
) -> usize {
    let size = (mark.height * 0.6).clamp(6.0, 48.0);
    let mut paint = Paint::default();
    paint.set_color_rgba8(128, 128, 128, (p.opacity.clamp(0.0, 1.0) * 255.0).round() as u8);
    paint.anti_alias = true;
    draw_text(canvas, fonts, &[], text, size, &paint, about_centre(p, mark))
}

#[cfg(test)]
mod tests {
    use image::ImageFormat;

    use super::*;
    use crate::fixtures::{solid_image, system_fonts};

    fn red_mark() -> MergeMark {
        MergeMark {
            png: solid_image(10, 10, [255, 0, 0, 255], ImageFormat::Png),
            width_px: 10,
            height_px: 10,
            dpi: 72.0,
            fallback_text: "DRAFT".into(),
        }
    }

    fn grid() -> GridLayout {
        GridLayout {
            spacing_x: 50.0,
            spacing_y: 50.0,
            margin: 0.0,
            ..GridLayout::default()
        }
    }

    #[test]
    fn marks_land_on_the_grid() {
        let page = solid_image(200, 100, [255, 255, 255, 255], ImageFormat::Png);
        let fonts = FontBook::new();
        let (bytes, format, report) =
            merge_raster(&page, &red_mark(), &grid(), LayerStrategy::Overlay, &fonts).unwrap();
        assert_eq!(format, DocumentFormat::Png);
        assert_eq!(report.placements_drawn, 8);

        let out = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(55, 55).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(30, 30).0, [255, 255, 255, 255]);
    }

    #[test]
    fn jpeg_pages_come_back_as_jpeg() {
        let page = solid_image(120, 80, [255, 255, 255, 255], ImageFormat::Jpeg);
        let fonts = FontBook::new();
        let (bytes, format, _) =
            merge_raster(&page, &red_mark(), &grid(), LayerStrategy::Background, &fonts).unwrap();
        assert_eq!(format, DocumentFormat::Jpeg);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    fn dark_pixels(image: &image::RgbaImage, x0: u32, y0: u32, w: u32, h: u32) -> usize {
        let mut count = 0;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                if image.get_pixel(x, y).0[0] < 200 {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn broken_mark_draws_fallback_text() {
        let fonts = system_fonts();
        if fonts.is_empty() {
            eprintln!("no system fonts installed; skipping");
            return;
        }
        let page = solid_image(400, 200, [255, 255, 255, 255], ImageFormat::Png);
        let mark = MergeMark {
            png: b"garbage".to_vec(),
            width_px: 80,
            height_px: 40,
            fallback_text: "ABC".into(),
            ..red_mark()
        };
        let grid = GridLayout {
            spacing_x: 200.0,
            spacing_y: 100.0,
            margin: 0.0,
            ..GridLayout::default()
        };
        let (bytes, _, report) =
            merge_raster(&page, &mark, &grid, LayerStrategy::Overlay, &fonts).unwrap();
        assert_eq!(report.placements_drawn, 0);
        assert_eq!(report.substitutions, 4);
        assert_eq!(report.warnings.len(), 1);

        let out = image::load_from_memory(&bytes).unwrap().to_rgba8();
        // 24px text centred in the first 80x40 cell: ink in the middle band,
        // none along the cell border where an outline would sit.
        assert!(dark_pixels(&out, 10, 10, 60, 20) > 20);
        assert_eq!(dark_pixels(&out, 0, 0, 80, 2), 0);
        assert_eq!(dark_pixels(&out, 0, 0, 2, 40), 0);
        assert_eq!(dark_pixels(&out, 0, 38, 80, 2), 0);
        // Grey, never the mark's own colour.
        let ink = out.pixels().find(|p| p.0[0] < 200).unwrap();
        assert_eq!(ink.0[0], ink.0[1]);
        assert_eq!(ink.0[1], ink.0[2]);
    }

    #[test]
    fn broken_mark_without_fonts_still_counts_substitutions() {
        let page = solid_image(200, 100, [255, 255, 255, 255], ImageFormat::Png);
        let mark = MergeMark {
            png: b"garbage".to_vec(),
            ..red_mark()
        };
        let fonts = FontBook::new();
        let (_, _, report) =
            merge_raster(&page, &mark, &grid(), LayerStrategy::Overlay, &fonts).unwrap();
        assert_eq!(report.substitutions, 8);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn undecodable_page_is_an_error() {
        let fonts = FontBook::new();
        assert!(merge_raster(b"nope", &red_mark(), &grid(), LayerStrategy::Overlay, &fonts).is_err());
    }
}
