// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tilemark-document: format detection, grid layout, the conversion cascade
// that turns any input into a paginated document, and the layer merger that
// tiles a rendered mark across every page.

pub mod convert;
pub mod detect;
pub mod grid;
pub mod merge;
pub mod pdf;
pub mod raster;

#[cfg(test)]
mod fixtures;

pub use convert::{ConversionPipeline, DocxLayoutConverter, NativeConverter, NativeOutput};
pub use detect::{FormatDetector, SignatureDetector, sniff};
pub use grid::{LayoutSummary, layout, summarize};
pub use merge::{LayerMerger, MergeMark, MergeReport, MergedDocument, order_placements};
pub use pdf::reader::PdfReader;
pub use pdf::writer::{Block, PdfWriter, WrittenPdf};
pub use raster::RasterPage;
