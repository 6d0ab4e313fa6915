// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Grid compositor: tiled mark placements for one page.
//
// Coordinates are top-left origin in page units (points for PDF pages,
// pixels for raster pages). A placement is kept only when the whole mark,
// rotated about its centre as the merger will draw it, fits inside the
// margins; boundary overlaps are dropped, never clipped.

use serde::Serialize;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::mark::{GridLayout, Jitter, Placement, Size};
use tilemark_render::rotated_bounds;
use tracing::debug;

/// Opacity lost per layer, as a fraction of the base opacity.
const LAYER_OPACITY_STEP: f32 = 0.1;

/// Extra rotation per layer, in degrees.
const LAYER_ROTATION_STEP: f32 = 15.0;

/// Upper bound on candidate cells (columns x rows x layers) for one page.
const MAX_GRID_CELLS: u64 = 1_000_000;

/// Slack for float noise in the bounds test.
const FIT_EPSILON: f32 = 1e-3;

/// Per-layer counts and coverage for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSummary {
    pub total: usize,
    pub per_layer: Vec<usize>,
    /// Sum of mark areas over page area. Overlapping layers can push this past 1.0.
    pub coverage: f32,
}

fn validate(grid: &GridLayout, mark: Size) -> Result<()> {
    let positive = |v: f32| v > 0.0 && v.is_finite();
    if !positive(grid.spacing_x) || !positive(grid.spacing_y) {
        return Err(TilemarkError::InvalidSpec(format!(
            "grid spacing must be positive (got {} x {})",
            grid.spacing_x, grid.spacing_y
        )));
    }
    if !(grid.margin >= 0.0) || !grid.margin.is_finite() {
        return Err(TilemarkError::InvalidSpec(format!(
            "grid margin {} must be non-negative",
            grid.margin
        )));
    }
    if !(mark.width >= 0.0) || !(mark.height >= 0.0) {
        return Err(TilemarkError::InvalidSpec("mark size must be non-negative".into()));
    }
    Ok(())
}

/// Compute every placement for `mark` on `page`.
///
/// Deterministic: identical inputs give identical lists, in layer, row,
/// column order.
pub fn layout(page: Size, mark: Size, grid: &GridLayout) -> Result<Vec<Placement>> {
    validate(grid, mark)?;

    let margin = grid.margin;
    let printable_w = page.width - 2.0 * margin;
    let printable_h = page.height - 2.0 * margin;
    if mark.width > printable_w || mark.height > printable_h {
        debug!(?page, ?mark, margin, "mark does not fit the printable area");
        return Ok(Vec::new());
    }

    let factor = grid.density.factor();
    let step_x = grid.spacing_x * factor;
    let step_y = grid.spacing_y * factor;
    let columns = cell_count(printable_w, step_x)?;
    let rows = cell_count(printable_h, step_y)?;
    let cells = columns
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(u64::from(grid.layers)))
        .filter(|&n| n <= MAX_GRID_CELLS)
        .ok_or_else(|| {
            TilemarkError::InvalidSpec(format!(
                "grid of {columns} x {rows} x {} layers exceeds {MAX_GRID_CELLS} cells; \
                 increase the spacing",
                grid.layers
            ))
        })?;
    // Both counts are bounded by MAX_GRID_CELLS from here on.
    let (columns, rows) = (columns as u32, rows as u32);

    let mut placements = Vec::new();
    for layer in 0..grid.layers {
        let opacity = (grid.base_opacity * (1.0 - layer as f32 * LAYER_OPACITY_STEP)).max(0.0);
        let rotation_offset = grid.base_rotation + layer as f32 * LAYER_ROTATION_STEP;
        // Cross-layer de-alignment. Layers 2, 4, ... land back on layer 0.
        let shift_x = (step_x * 0.5 * layer as f32) % step_x;
        let shift_y = (step_y * 0.5 * layer as f32) % step_y;
        let (box_w, box_h) = rotated_bounds(mark.width, mark.height, rotation_offset);
        let fits = |x: f32, y: f32| {
            let cx = x + mark.width / 2.0;
            let cy = y + mark.height / 2.0;
            cx - box_w / 2.0 >= margin - FIT_EPSILON
                && cy - box_h / 2.0 >= margin - FIT_EPSILON
                && cx + box_w / 2.0 <= page.width - margin + FIT_EPSILON
                && cy + box_h / 2.0 <= page.height - margin + FIT_EPSILON
        };

        for row in 0..rows {
            for col in 0..columns {
                let mut x = margin + col as f32 * step_x + shift_x;
                let mut y = margin + row as f32 * step_y + shift_y;
                if grid.stagger && row % 2 == 1 {
                    x += step_x / 2.0;
                }
                if let Some(jitter) = grid.jitter {
                    let (dx, dy) = jitter_offset(jitter, layer, row, col);
                    x += dx;
                    y += dy;
                }
                if fits(x, y) {
                    placements.push(Placement {
                        x,
                        y,
                        layer,
                        opacity,
                        rotation_offset,
                    });
                }
            }
        }
    }

    debug!(
        placements = placements.len(),
        rows, columns, cells, layers = grid.layers, "grid laid out"
    );
    Ok(placements)
}

/// Grid positions along one axis: `floor(extent / step) + 1`, or an error
/// when that cannot be represented.
fn cell_count(extent: f32, step: f32) -> Result<u64> {
    let steps = (f64::from(extent) / f64::from(step)).floor();
    if !steps.is_finite() || steps >= MAX_GRID_CELLS as f64 {
        return Err(TilemarkError::InvalidSpec(format!(
            "grid step {step} is too small for an extent of {extent}"
        )));
    }
    Ok(steps.max(0.0) as u64 + 1)
}

/// Count placements per layer and the area they cover.
pub fn summarize(page: Size, mark: Size, layers: u32, placements: &[Placement]) -> LayoutSummary {
    let mut per_layer = vec![0; layers as usize];
    for p in placements {
        if let Some(count) = per_layer.get_mut(p.layer as usize) {
            *count += 1;
        }
    }
    let page_area = page.width * page.height;
    let coverage = if page_area > 0.0 {
        placements.len() as f32 * mark.width * mark.height / page_area
    } else {
        0.0
    };
    LayoutSummary {
        total: placements.len(),
        per_layer,
        coverage,
    }
}

/// Hash-derived offset in `[-amplitude, amplitude]` on each axis.
fn jitter_offset(jitter: Jitter, layer: u32, row: u32, col: u32) -> (f32, f32) {
    let cell = jitter.seed
        ^ (u64::from(layer) << 48)
        ^ (u64::from(row) << 24)
        ^ u64::from(col);
    let unit = |salt: u64| {
        let hash = (cell ^ salt)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let hash = (hash ^ (hash >> 33)).wrapping_mul(6364136223846793005);
        (hash >> 11) as f64 / (1u64 << 53) as f64
    };
    let amplitude = f64::from(jitter.amplitude);
    (
        ((unit(0x9E37) * 2.0 - 1.0) * amplitude) as f32,
        ((unit(0x7F4A) * 2.0 - 1.0) * amplitude) as f32,
    )
}
