// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for asset resolution and document conversion.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Assets -------------------------------------------------------------------

/// Startup description of an external capability module.
///
/// Immutable once the catalogue is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Unique asset name (e.g. `"pdf-codec"`).
    pub name: String,
    /// Candidate sources, tried in order.
    pub mirrors: Vec<String>,
    /// Symbol the module must export once linked.
    pub expected_symbol: String,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_asset_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per mirror before moving on.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Higher priorities are resolved first in batch mode.
    #[serde(default)]
    pub priority: i32,
    /// Assets that must be resolved before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_asset_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    2
}

impl AssetDescriptor {
    pub fn new(name: impl Into<String>, expected_symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mirrors: Vec::new(),
            expected_symbol: expected_symbol.into(),
            timeout_ms: default_asset_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.mirrors.push(url.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where a successful resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Already resolved earlier in this process.
    Cached,
    /// Fetched from the first-choice mirror.
    Network,
    /// Fetched after at least one other mirror failed.
    Fallback,
}

/// Result of one resolution attempt. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub name: String,
    pub success: bool,
    pub elapsed: Duration,
    pub mirror: Option<String>,
    pub reason: Option<String>,
    pub provenance: Provenance,
}

impl LoadOutcome {
    pub fn loaded(name: &str, mirror: &str, elapsed: Duration, provenance: Provenance) -> Self {
        Self {
            name: name.to_owned(),
            success: true,
            elapsed,
            mirror: Some(mirror.to_owned()),
            reason: None,
            provenance,
        }
    }

    pub fn cached(name: &str, mirror: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            success: true,
            elapsed: Duration::ZERO,
            mirror,
            reason: None,
            provenance: Provenance::Cached,
        }
    }

    pub fn failed(name: &str, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.to_owned(),
            success: false,
            elapsed,
            mirror: None,
            reason: Some(reason.into()),
            provenance: Provenance::Network,
        }
    }

    /// Convert a failed outcome into the typed error surfaced to callers.
    pub fn into_result(self) -> crate::error::Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(crate::error::TilemarkError::AssetUnavailable {
                reason: self.reason.clone().unwrap_or_default(),
                name: self.name,
            })
        }
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Worth another attempt.
    Transient,
    /// Retrying the same source will not help.
    Permanent,
}

// -- Documents ----------------------------------------------------------------

/// Document formats recognised by the signature detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Docx,
    Doc,
    Odt,
    Rtf,
    PlainText,
    Zip,
    Unknown,
}

impl DocumentFormat {
    /// MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Webp => "image/webp",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Doc => "application/msword",
            Self::Odt => "application/vnd.oasis.opendocument.text",
            Self::Rtf => "application/rtf",
            Self::PlainText => "text/plain",
            Self::Zip => "application/zip",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::Webp),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "odt" => Some(Self::Odt),
            "rtf" => Some(Self::Rtf),
            "txt" | "text" | "md" => Some(Self::PlainText),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Word-processor documents are eligible for native conversion.
    pub fn is_word_processor(&self) -> bool {
        matches!(self, Self::Docx | Self::Doc | Self::Odt | Self::Rtf)
    }

    /// Raster images are watermarked in place.
    pub fn is_raster(&self) -> bool {
        matches!(
            self,
            Self::Png | Self::Jpeg | Self::Gif | Self::Bmp | Self::Tiff | Self::Webp
        )
    }
}

/// Output of the file-signature detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub format: DocumentFormat,
    /// 0.0 (guess) to 1.0 (certain).
    pub confidence: f32,
    pub warnings: Vec<String>,
}

/// Which path of the conversion cascade produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMethod {
    Native,
    Extraction,
    Fallback,
}

/// Kinds of structural element a conversion can keep or lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Pages,
    Text,
    Images,
    Vector,
    Pixels,
    Paragraphs,
    Headings,
    Tables,
    Layout,
}

/// States of the conversion cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionState {
    Detect,
    Passthrough,
    NativeAttempt,
    ExtractionAttempt,
    FallbackSynthesis,
    Done,
}

/// A paginated document ready for mark merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaginatedDocument {
    /// Vector pages (PDF bytes).
    Pdf { bytes: Vec<u8>, page_count: usize },
    /// A single raster page, kept in its original encoding.
    Raster {
        bytes: Vec<u8>,
        format: DocumentFormat,
        width: u32,
        height: u32,
    },
}

impl PaginatedDocument {
    pub fn page_count(&self) -> usize {
        match self {
            Self::Pdf { page_count, .. } => *page_count,
            Self::Raster { .. } => 1,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Pdf { bytes, .. } | Self::Raster { bytes, .. } => bytes,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf { .. } => DocumentFormat::Pdf.mime_type(),
            Self::Raster { format, .. } => format.mime_type(),
        }
    }
}

/// A document handed to the pipeline: a display name and its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, named after its final path component.
    pub fn read(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

/// Outcome of running one input through the conversion cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    pub method: ConversionMethod,
    pub document: Option<PaginatedDocument>,
    /// Non-empty only for `Native`.
    pub preserved: Vec<ElementKind>,
    pub lost: Vec<ElementKind>,
    pub file_format: DocumentFormat,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// Visited states, in order.
    pub transitions: Vec<ConversionState>,
}

impl ConversionResult {
    pub fn page_count(&self) -> usize {
        self.document.as_ref().map_or(0, PaginatedDocument::page_count)
    }
}

/// Standard paper sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    A4,
    A3,
    A5,
    Letter,
    Legal,
    Custom { width_mm: u32, height_mm: u32 },
}

impl PaperSize {
    /// Dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::A4 => (210, 297),
            Self::A3 => (297, 420),
            Self::A5 => (148, 210),
            Self::Letter => (216, 279),
            Self::Legal => (216, 356),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    /// Dimensions in PDF points (1/72 inch).
    pub fn dimensions_pt(&self) -> (f32, f32) {
        let (w, h) = self.dimensions_mm();
        (w as f32 * 72.0 / 25.4, h as f32 * 72.0 / 25.4)
    }
}

/// Transient reference to an in-memory output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(pub Uuid);

impl ArtifactHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "artifact:{}", self.0)
    }
}
