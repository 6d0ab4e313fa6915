// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for people who just want their document marked.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity drives how the CLI (or any front end) presents the problem.

use crate::error::TilemarkError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Trying again may work.
    Transient,
    /// The user must change something (settings, input file, config).
    ActionRequired,
    /// Cannot be fixed by retrying.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether trying again unchanged could succeed.
    pub retriable: bool,
    /// Severity level.
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `TilemarkError` into a `HumanError`.
pub fn humanize_error(err: &TilemarkError) -> HumanError {
    match err {
        TilemarkError::AssetUnavailable { name, reason } => humanize_asset_error(name, reason),

        TilemarkError::Fetch(_) | TilemarkError::Timeout(_) => HumanError::new(
            "A download didn't finish.",
            "Check your network connection, then try again.",
            true,
            Severity::Transient,
        ),

        TilemarkError::PoolExhausted { capacity } => HumanError::new(
            "Too many marks are being drawn at once.",
            format!(
                "Wait for the current documents to finish, or raise the surface pool size (currently {capacity})."
            ),
            true,
            Severity::Transient,
        ),

        TilemarkError::InvalidSpec(detail) => HumanError::new(
            "The watermark settings aren't valid.",
            format!("Check the opacity (0 to 1) and the text size (above 0). ({detail})"),
            false,
            Severity::ActionRequired,
        ),

        TilemarkError::RenderError(_) | TilemarkError::FontError(_) => HumanError::new(
            "The watermark couldn't be drawn.",
            "Try a different font or shorter text.",
            false,
            Severity::ActionRequired,
        ),

        TilemarkError::ConversionDegraded(_) => HumanError::new(
            "The document was converted in a simpler way.",
            "Some layout may be lost. Save the file as a PDF first to keep its exact look.",
            false,
            Severity::Permanent,
        ),

        TilemarkError::ExtractionFailed(_) => HumanError::new(
            "We couldn't read any text from this document.",
            "The file may be damaged. Try opening and re-saving it, or export it as a PDF.",
            false,
            Severity::Permanent,
        ),

        TilemarkError::MergeImageFailed { page, .. } => HumanError::new(
            "One of the watermarks couldn't be placed.",
            format!("Page {page} received a plain text mark instead."),
            false,
            Severity::Permanent,
        ),

        TilemarkError::PdfError(_) => HumanError::new(
            "There's a problem with this PDF file.",
            "The file may be damaged. Try opening it in a PDF viewer first to check it works.",
            false,
            Severity::Permanent,
        ),

        TilemarkError::ImageError(_) => HumanError::new(
            "There's a problem with this image.",
            "The image may be damaged or in an unusual format. Try saving it as a PNG first.",
            false,
            Severity::Permanent,
        ),

        TilemarkError::IntegrityMismatch { .. } => HumanError::new(
            "This file has been changed since it was stamped.",
            "The stored fingerprint doesn't match. Watermark the original file again.",
            false,
            Severity::Permanent,
        ),

        TilemarkError::Signing(_) => HumanError::new(
            "The tamper-evidence stamp couldn't be created.",
            "The document was still watermarked. Try again to add the stamp.",
            true,
            Severity::Transient,
        ),

        TilemarkError::Config(detail) => HumanError::new(
            "The configuration file has a problem.",
            format!("Fix the setting and try again. ({detail})"),
            false,
            Severity::ActionRequired,
        ),

        TilemarkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => HumanError::new(
                "The file couldn't be found.",
                "It may have been moved or deleted. Check the path and try again.",
                false,
                Severity::ActionRequired,
            ),
            std::io::ErrorKind::PermissionDenied => HumanError::new(
                "We don't have permission to use that file.",
                "Check the file permissions, or copy the file somewhere else first.",
                false,
                Severity::ActionRequired,
            ),
            _ => HumanError::new(
                "There was a problem reading or writing a file.",
                "Try again. If this keeps happening, the disk may be full.",
                true,
                Severity::Transient,
            ),
        },

        TilemarkError::Serialization(_) => HumanError::new(
            "Some settings couldn't be read.",
            "Check that the configuration file is valid JSON.",
            false,
            Severity::ActionRequired,
        ),
    }
}

/// Asset failures carry a reason code; pick the message from it.
fn humanize_asset_error(name: &str, reason: &str) -> HumanError {
    if reason.starts_with("CIRCULAR_DEPENDENCY") {
        HumanError::new(
            "A required component is configured incorrectly.",
            format!("'{name}' depends on itself. Check the asset dependencies in the configuration."),
            false,
            Severity::ActionRequired,
        )
    } else if reason.starts_with("UNKNOWN_ASSET") {
        HumanError::new(
            "A required component isn't configured.",
            format!("Add '{name}' to the asset list in the configuration."),
            false,
            Severity::ActionRequired,
        )
    } else if reason.starts_with("SYMBOL_MISSING") {
        HumanError::new(
            "A downloaded component didn't work.",
            format!("'{name}' loaded but didn't provide what we need. Try a different mirror."),
            false,
            Severity::Permanent,
        )
    } else {
        HumanError::new(
            "A required component couldn't be downloaded.",
            format!("None of the download sources for '{name}' answered. Check your connection and try again."),
            true,
            Severity::Transient,
        )
    }
}
