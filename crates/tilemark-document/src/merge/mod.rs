// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Layer merger: draw a rendered mark at every grid placement of every page.
//
// Placements are computed per page from that page's own size, ordered by
// the layer strategy, then drawn. A mark that cannot be embedded is
// replaced by its fallback text at the same spot; the page carries on.

pub mod pdf;
pub mod raster;

use std::sync::Arc;

use serde::Serialize;
use tilemark_core::config::MergeConfig;
use tilemark_core::error::Result;
use tilemark_core::mark::{GridLayout, LayerStrategy, Placement, Size};
use tilemark_core::types::{DocumentFormat, PaginatedDocument};
use tilemark_render::{FontBook, RenderedMark};
use tracing::{info, instrument};

/// The mark image as the merger needs it.
#[derive(Debug, Clone)]
pub struct MergeMark {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    /// Resolution the PNG was rendered at.
    pub dpi: f32,
    /// Drawn instead of the image when embedding fails.
    pub fallback_text: String,
}

impl MergeMark {
    pub fn from_rendered(mark: &RenderedMark, dpi: f32, fallback_text: impl Into<String>) -> Self {
        Self {
            png: mark.png.clone(),
            width_px: mark.width,
            height_px: mark.height,
            dpi,
            fallback_text: fallback_text.into(),
        }
    }

    /// Size on a PDF page.
    pub fn size_pt(&self) -> Size {
        let scale = 72.0 / self.dpi;
        Size::new(self.width_px as f32 * scale, self.height_px as f32 * scale)
    }

    /// Size on a raster page.
    pub fn size_px(&self) -> Size {
        Size::new(self.width_px as f32, self.height_px as f32)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub pages: usize,
    pub placements_drawn: usize,
    pub substitutions: usize,
    pub bytes: usize,
    pub warnings: Vec<String>,
}

/// A finished, watermarked document.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
    pub page_count: usize,
    pub report: MergeReport,
}

impl MergedDocument {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Sort one page's placements into draw order. Sorts are stable.
///
/// `page_index` is zero-based; `Alternating` uses overlay order on even
/// indices and background order on odd ones.
pub fn order_placements(placements: &mut [Placement], strategy: LayerStrategy, page_index: usize) {
    let by_position =
        |a: &Placement, b: &Placement| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x));
    match strategy {
        LayerStrategy::Overlay => {
            placements.sort_by(|a, b| a.layer.cmp(&b.layer).then(by_position(a, b)));
        }
        LayerStrategy::Background => {
            placements.sort_by(|a, b| b.layer.cmp(&a.layer).then(by_position(a, b)));
        }
        LayerStrategy::Alternating => {
            let effective = if page_index % 2 == 0 {
                LayerStrategy::Overlay
            } else {
                LayerStrategy::Background
            };
            order_placements(placements, effective, page_index);
        }
        LayerStrategy::Mixed => placements.sort_by_key(|p| p.layer),
    }
}

pub struct LayerMerger {
    config: MergeConfig,
    /// Draws substitute text on raster pages.
    fonts: Arc<FontBook>,
}

impl LayerMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            fonts: Arc::new(FontBook::new()),
        }
    }

    pub fn with_fonts(mut self, fonts: Arc<FontBook>) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    #[instrument(skip_all, fields(pages = document.page_count(), strategy = ?self.config.strategy))]
    pub fn merge(
        &self,
        document: &PaginatedDocument,
        mark: &MergeMark,
        grid: &GridLayout,
    ) -> Result<MergedDocument> {
        let merged = match document {
            PaginatedDocument::Pdf { bytes, .. } => {
                let (bytes, report) = pdf::merge_pdf(bytes, mark, grid, &self.config)?;
                MergedDocument {
                    page_count: report.pages,
                    bytes,
                    format: DocumentFormat::Pdf,
                    report,
                }
            }
            PaginatedDocument::Raster { bytes, .. } => {
                let (bytes, format, report) =
                    raster::merge_raster(bytes, mark, grid, self.config.strategy, &self.fonts)?;
                MergedDocument {
                    page_count: 1,
                    bytes,
                    format,
                    report,
                }
            }
        };
        info!(
            placements = merged.report.placements_drawn,
            substitutions = merged.report.substitutions,
            bytes = merged.report.bytes,
            "marks merged"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(layer: u32, x: f32, y: f32) -> Placement {
        Placement {
            x,
            y,
            layer,
            opacity: 1.0,
            rotation_offset: 0.0,
        }
    }

    fn layers(placements: &[Placement]) -> Vec<u32> {
        placements.iter().map(|p| p.layer).collect()
    }

    #[test]
    fn strategies_order_layers() {
        let base = vec![at(2, 0.0, 0.0), at(0, 5.0, 0.0), at(1, 0.0, 0.0), at(0, 1.0, 0.0)];

        let mut overlay = base.clone();
        order_placements(&mut overlay, LayerStrategy::Overlay, 0);
        assert_eq!(layers(&overlay), vec![0, 0, 1, 2]);
        assert_eq!(overlay[0].x, 1.0);

        let mut background = base.clone();
        order_placements(&mut background, LayerStrategy::Background, 0);
        assert_eq!(layers(&background), vec![2, 1, 0, 0]);

        let mut alternating_odd = base.clone();
        order_placements(&mut alternating_odd, LayerStrategy::Alternating, 1);
        assert_eq!(alternating_odd, background);

        let mut alternating_even = base.clone();
        order_placements(&mut alternating_even, LayerStrategy::Alternating, 2);
        assert_eq!(alternating_even, overlay);

        // Mixed keeps generation order inside a layer.
        let mut mixed = base;
        order_placements(&mut mixed, LayerStrategy::Mixed, 0);
        assert_eq!(layers(&mixed), vec![0, 0, 1, 2]);
        assert_eq!(mixed[0].x, 5.0);
    }

    #[test]
    fn mark_sizes_follow_render_dpi() {
        let mark = MergeMark {
            png: Vec::new(),
            width_px: 288,
            height_px: 144,
            dpi: 144.0,
            fallback_text: "DRAFT".into(),
        };
        assert_eq!(mark.size_pt(), Size::new(144.0, 72.0));
        assert_eq!(mark.size_px(), Size::new(288.0, 144.0));
    }
}
