// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark render: pooled raster surfaces, font fallback, and mark rendering.

pub mod cache;
pub mod font;
pub mod mark;
pub mod pixels;
pub mod surface;
pub mod svg;

pub use cache::{CacheStats, RenderCache, render_key};
pub use font::{FontBook, FontRun, GlyphPlacement, RegisteredFont};
pub use mark::{MarkRenderer, RenderedMark, draw_text, rotated_bounds};
pub use pixels::{decode_to_pixmap, encode_png, pixmap_to_rgba, rgba_to_pixmap};
pub use surface::{
    MemoryManager, MemoryStats, PoolStats, SharedPool, SurfaceId, SurfaceLease, SurfacePool,
    spawn_memory_sweep,
};
pub use svg::render_svg;
