// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tilemark.

use thiserror::Error;

/// Top-level error type for all Tilemark operations.
#[derive(Debug, Error)]
pub enum TilemarkError {
    // -- Asset resolution --
    #[error("asset '{name}' unavailable: {reason}")]
    AssetUnavailable { name: String, reason: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    // -- Surfaces and rendering --
    #[error("surface pool exhausted ({capacity} surfaces in use)")]
    PoolExhausted { capacity: usize },

    #[error("invalid mark specification: {0}")]
    InvalidSpec(String),

    #[error("render failed: {0}")]
    RenderError(String),

    #[error("font error: {0}")]
    FontError(String),

    // -- Conversion and merge --
    #[error("conversion degraded: {0}")]
    ConversionDegraded(String),

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("embedding mark on page {page} failed: {reason}")]
    MergeImageFailed { page: usize, reason: String },

    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    // -- Integrity --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("signing failed: {0}")]
    Signing(String),

    // -- Configuration and I/O --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TilemarkError>;
