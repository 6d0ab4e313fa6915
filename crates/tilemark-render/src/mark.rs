// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// MarkRenderer: mark specification -> PNG (and optional SVG).
//
// The surface is sized to the rotated bounding box of the content so the
// mark never clips, then the content is drawn centred with rotation about
// the surface centre. Surfaces come from the shared pool and always go
// back, including when drawing or encoding fails.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use image::imageops::FilterType;
use tilemark_core::config::RenderConfig;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::mark::{MarkContent, MarkSpec};
use tiny_skia::{FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Transform};
use tracing::{debug, info, instrument};
use ttf_parser::{GlyphId, OutlineBuilder};

use crate::cache::{CacheStats, RenderCache, render_key};
use crate::font::{FontBook, FontRun};
use crate::pixels::{encode_png, rgba_to_pixmap};
use crate::surface::{SharedPool, SurfaceLease};
use crate::svg::render_svg;

/// A finished mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMark {
    pub png: Vec<u8>,
    pub svg: Option<String>,
    /// Pixel dimensions of `png`.
    pub width: u32,
    pub height: u32,
    pub cache_key: String,
}

/// Width and height of a `w × h` box rotated by `degrees`.
pub fn rotated_bounds(width: f32, height: f32, degrees: f32) -> (f32, f32) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    (
        (width * cos).abs() + (height * sin).abs(),
        (width * sin).abs() + (height * cos).abs(),
    )
}

/// Round a float extent up to whole pixels, ignoring float noise.
fn to_px(extent: f32) -> u32 {
    (extent - 1e-3).ceil().max(1.0) as u32
}

enum Content {
    Text {
        runs: Vec<FontRun>,
        size_px: f32,
        width: f32,
        ascent: f32,
        descent: f32,
    },
    Image(Pixmap),
}

impl Content {
    fn extent(&self) -> (f32, f32) {
        match self {
            Self::Text {
                width,
                ascent,
                descent,
                ..
            } => (*width, ascent + descent),
            Self::Image(pixmap) => (pixmap.width() as f32, pixmap.height() as f32),
        }
    }
}

#[derive(Clone)]
pub struct MarkRenderer {
    pool: SharedPool,
    fonts: Arc<FontBook>,
    cache: Arc<Mutex<RenderCache>>,
    config: Arc<RenderConfig>,
}

impl MarkRenderer {
    pub fn new(pool: SharedPool, fonts: Arc<FontBook>, config: RenderConfig) -> Self {
        Self {
            pool,
            fonts,
            cache: Arc::new(Mutex::new(RenderCache::new(config.cache_capacity))),
            config: Arc::new(config),
        }
    }

    pub fn fonts(&self) -> &FontBook {
        &self.fonts
    }

    pub fn shared_fonts(&self) -> Arc<FontBook> {
        Arc::clone(&self.fonts)
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Pixels per point at the configured DPI.
    pub fn pixel_scale(&self) -> f32 {
        self.config.dpi / 72.0
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Render `spec`, serving identical requests from the cache.
    #[instrument(skip_all, fields(rotation = spec.rotation, opacity = spec.opacity))]
    pub fn render(&self, spec: &MarkSpec) -> Result<Arc<RenderedMark>> {
        spec.validate()?;

        let key = render_key(spec, &self.config);
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            debug!(key = %key, "render cache hit");
            return Ok(hit);
        }

        let content = self.prepare(spec)?;
        let (content_w, content_h) = content.extent();
        let (box_w, box_h) = rotated_bounds(content_w, content_h, spec.rotation);
        let pad = self.config.padding_px.saturating_mul(2);
        let width = to_px(box_w).saturating_add(pad);
        let height = to_px(box_h).saturating_add(pad);

        let mut lease = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire(width, height)?;
        let drawn = draw(&mut lease, &content, spec, &self.fonts)
            .and_then(|()| encode_png(lease.pixmap()));
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(lease);
        let png = drawn?;

        let svg = self
            .config
            .include_svg
            .then(|| render_svg(spec, width, height));

        let rendered = Arc::new(RenderedMark {
            png,
            svg,
            width,
            height,
            cache_key: key.clone(),
        });
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&rendered));

        info!(width, height, bytes = rendered.png.len(), "mark rendered");
        Ok(rendered)
    }

    /// SVG rendition only; no surface is used.
    pub fn render_svg(&self, spec: &MarkSpec) -> Result<String> {
        spec.validate()?;
        let (w, h) = self.prepare(spec)?.extent();
        let (box_w, box_h) = rotated_bounds(w, h, spec.rotation);
        Ok(render_svg(spec, to_px(box_w), to_px(box_h)))
    }

    /// Render several specs on blocking threads, at most `max_concurrent`
    /// at a time. Results keep input order.
    pub async fn render_batch(
        &self,
        specs: Vec<MarkSpec>,
        max_concurrent: usize,
    ) -> Vec<Result<Arc<RenderedMark>>> {
        let mut results = Vec::with_capacity(specs.len());
        for wave in specs.chunks(max_concurrent.max(1)) {
            let tasks = wave.iter().cloned().map(|spec| {
                let renderer = self.clone();
                tokio::task::spawn_blocking(move || renderer.render(&spec))
            });
            for joined in join_all(tasks).await {
                results.push(
                    joined
                        .map_err(|e| TilemarkError::RenderError(format!("render task failed: {e}")))
                        .and_then(|r| r),
                );
            }
        }
        results
    }

    fn prepare(&self, spec: &MarkSpec) -> Result<Content> {
        match &spec.content {
            MarkContent::Text(text) => {
                let size_px = spec.size * self.pixel_scale();
                let chain = self.font_chain(spec);
                let primary = self.fonts.select_primary(&chain, text, size_px);
                let runs = self.fonts.split_runs(primary.as_deref(), &chain, text);
                let width = self.fonts.measure_runs(&runs, size_px);
                let (ascent, descent) = match &primary {
                    Some(family) => self.fonts.line_metrics(family, size_px),
                    None => (size_px * 0.8, size_px * 0.2),
                };
                debug!(
                    primary = primary.as_deref().unwrap_or("<none>"),
                    runs = runs.len(),
                    width,
                    "text measured"
                );
                Ok(Content::Text {
                    runs,
                    size_px,
                    width,
                    ascent,
                    descent,
                })
            }
            MarkContent::Image(bytes) => {
                let decoded = image::load_from_memory(bytes)
                    .map_err(|e| TilemarkError::ImageError(format!("mark image: {e}")))?;
                let scale = spec.scale.unwrap_or(1.0);
                let w = ((decoded.width() as f32 * scale).round() as u32).max(1);
                let h = ((decoded.height() as f32 * scale).round() as u32).max(1);
                let resized = if (w, h) == (decoded.width(), decoded.height()) {
                    decoded.to_rgba8()
                } else {
                    decoded.resize_exact(w, h, FilterType::Triangle).to_rgba8()
                };
                Ok(Content::Image(rgba_to_pixmap(&resized)?))
            }
        }
    }

    /// Spec families first, then configured fallbacks, without repeats.
    fn font_chain(&self, spec: &MarkSpec) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        for family in spec.font_families.iter().chain(&self.config.fallback_families) {
            if !chain.iter().any(|f| f.eq_ignore_ascii_case(family)) {
                chain.push(family.clone());
            }
        }
        chain
    }
}

fn draw(lease: &mut SurfaceLease, content: &Content, spec: &MarkSpec, fonts: &FontBook) -> Result<()> {
    let cx = lease.width() as f32 / 2.0;
    let cy = lease.height() as f32 / 2.0;
    // Counter-clockwise on screen is a negative angle in y-down space.
    lease.transform = Transform::from_translate(cx, cy).pre_rotate(-spec.rotation);
    lease.alpha = spec.opacity;
    let transform = lease.transform;

    match content {
        Content::Text {
            runs,
            size_px,
            width,
            ascent,
            descent,
        } => {
            let alpha = (f32::from(spec.color.a) * spec.opacity).round().clamp(0.0, 255.0) as u8;
            let mut paint = Paint::default();
            paint.set_color_rgba8(spec.color.r, spec.color.g, spec.color.b, alpha);
            paint.anti_alias = true;

            let glyphs_drawn = draw_runs(
                lease.pixmap_mut(),
                fonts,
                runs,
                *size_px,
                (*width, *ascent, *descent),
                &paint,
                transform,
            );
            debug!(glyphs_drawn, "text drawn");
            Ok(())
        }
        Content::Image(image) => {
            let paint = PixmapPaint {
                opacity: spec.opacity,
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            let x = -(image.width() as i32) / 2;
            let y = -(image.height() as i32) / 2;
            lease
                .pixmap_mut()
                .draw_pixmap(x, y, image.as_ref(), &paint, transform, None);
            Ok(())
        }
    }
}

/// Draw `text` centred on the origin of `transform`.
///
/// The family is picked from `chain` the way marks pick theirs; when nothing
/// in `chain` is registered any registered family is used. Returns the
/// number of glyphs drawn, zero when the book holds no usable font.
pub fn draw_text(
    pixmap: &mut Pixmap,
    fonts: &FontBook,
    chain: &[String],
    text: &str,
    size_px: f32,
    paint: &Paint<'_>,
    transform: Transform,
) -> usize {
    let mut stack = chain.to_vec();
    if !stack.iter().any(|f| fonts.resolve(f).is_some()) {
        stack.extend(fonts.families().map(str::to_owned));
    }
    let primary = fonts.select_primary(&stack, text, size_px);
    let runs = fonts.split_runs(primary.as_deref(), &stack, text);
    let width = fonts.measure_runs(&runs, size_px);
    let (ascent, descent) = match &primary {
        Some(family) => fonts.line_metrics(family, size_px),
        None => (size_px * 0.8, size_px * 0.2),
    };
    draw_runs(pixmap, fonts, &runs, size_px, (width, ascent, descent), paint, transform)
}

/// Lay `runs` out left to right so the line box is centred on the origin.
fn draw_runs(
    pixmap: &mut Pixmap,
    fonts: &FontBook,
    runs: &[FontRun],
    size_px: f32,
    (width, ascent, descent): (f32, f32, f32),
    paint: &Paint<'_>,
    transform: Transform,
) -> usize {
    let baseline = -(ascent + descent) / 2.0 + ascent;
    let mut pen_x = -width / 2.0;
    let mut drawn = 0usize;
    for run in runs {
        let Some(family) = &run.family else {
            pen_x += fonts.measure_runs(std::slice::from_ref(run), size_px);
            continue;
        };
        drawn += draw_run(
            pixmap,
            fonts,
            family,
            &run.text,
            size_px,
            (pen_x, baseline),
            paint,
            transform,
        );
        pen_x += fonts.measure(family, size_px, &run.text);
    }
    drawn
}

#[allow(clippy::too_many_arguments)]
fn draw_run(
    pixmap: &mut Pixmap,
    fonts: &FontBook,
    family: &str,
    text: &str,
    size_px: f32,
    origin: (f32, f32),
    paint: &Paint<'_>,
    transform: Transform,
) -> usize {
    let Some(font) = fonts.resolve(family) else {
        return 0;
    };
    let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
        return 0;
    };
    let scale = size_px / f32::from(face.units_per_em().max(1));

    let mut drawn = 0;
    for glyph in fonts.layout_glyphs(family, size_px, text) {
        let mut builder = GlyphPathBuilder::new(origin.0 + glyph.x, origin.1 + glyph.y, scale);
        if face.outline_glyph(GlyphId(glyph.glyph_id), &mut builder).is_none() {
            continue;
        }
        if let Some(path) = builder.finish() {
            pixmap.fill_path(&path, paint, FillRule::Winding, transform, None);
            drawn += 1;
        }
    }
    drawn
}

/// Converts y-up font outlines into y-down surface paths.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<tiny_skia::Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}
