// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mark specification, grid configuration, and placement types.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TilemarkError};

/// 8-bit RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const GREY: Self = Self::rgb(128, 128, 128);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn parse_hex(input: &str) -> Result<Self> {
        let hex = input.trim().trim_start_matches('#');
        let bad = || TilemarkError::InvalidSpec(format!("unparsable colour '{input}'"));
        let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| bad());

        match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, ch) in hex.chars().enumerate() {
                    let v = ch.to_digit(16).ok_or_else(bad)? as u8;
                    out[i] = v * 17;
                }
                Ok(Self::rgb(out[0], out[1], out[2]))
            }
            6 => Ok(Self::rgb(byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?)),
            8 => Ok(Self {
                r: byte(&hex[0..2])?,
                g: byte(&hex[2..4])?,
                b: byte(&hex[4..6])?,
                a: byte(&hex[6..8])?,
            }),
            _ => Err(bad()),
        }
    }

    /// Lowercase `#rrggbb` (alpha is carried separately as opacity).
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::GREY
    }
}

/// What the mark draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkContent {
    /// A text run, possibly mixing scripts.
    Text(String),
    /// An encoded image (PNG, JPEG, ...).
    Image(Vec<u8>),
}

/// Description of a single watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkSpec {
    pub content: MarkContent,
    /// Font families, most preferred first.
    pub font_families: Vec<String>,
    /// Font size in points.
    pub size: f32,
    pub color: Rgba,
    /// 0.0 (invisible) to 1.0 (opaque).
    pub opacity: f32,
    /// Degrees, counter-clockwise.
    pub rotation: f32,
    /// Optional scale for image marks.
    pub scale: Option<f32>,
}

impl MarkSpec {
    /// A text mark with sensible defaults (grey, 30% opacity, -45°).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: MarkContent::Text(text.into()),
            font_families: vec!["Helvetica".into(), "Arial".into(), "Noto Sans".into()],
            size: 36.0,
            color: Rgba::GREY,
            opacity: 0.3,
            rotation: -45.0,
            scale: None,
        }
    }

    /// An image mark.
    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            content: MarkContent::Image(bytes),
            font_families: Vec::new(),
            size: 36.0,
            color: Rgba::GREY,
            opacity: 0.3,
            rotation: 0.0,
            scale: None,
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    /// Reject out-of-range values before any work begins.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(TilemarkError::InvalidSpec(format!(
                "opacity {} outside [0, 1]",
                self.opacity
            )));
        }
        if !(self.size > 0.0) || !self.size.is_finite() {
            return Err(TilemarkError::InvalidSpec(format!(
                "size {} must be positive",
                self.size
            )));
        }
        if !self.rotation.is_finite() {
            return Err(TilemarkError::InvalidSpec("rotation must be finite".into()));
        }
        if let Some(scale) = self.scale
            && (!(scale > 0.0) || !scale.is_finite())
        {
            return Err(TilemarkError::InvalidSpec(format!(
                "scale {scale} must be positive"
            )));
        }
        match &self.content {
            MarkContent::Text(text) if text.trim().is_empty() => {
                Err(TilemarkError::InvalidSpec("mark text is empty".into()))
            }
            MarkContent::Image(bytes) if bytes.is_empty() => {
                Err(TilemarkError::InvalidSpec("mark image is empty".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Spacing multiplier presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityMode {
    Sparse,
    #[default]
    Normal,
    Dense,
}

impl DensityMode {
    pub fn factor(&self) -> f32 {
        match self {
            Self::Sparse => 1.5,
            Self::Normal => 1.0,
            Self::Dense => 0.7,
        }
    }
}

/// Deterministic per-placement offset noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Jitter {
    pub seed: u64,
    /// Maximum offset in points along each axis.
    pub amplitude: f32,
}

/// Tiling configuration. Pure data, no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    pub spacing_x: f32,
    pub spacing_y: f32,
    pub layers: u32,
    pub density: DensityMode,
    pub stagger: bool,
    pub margin: f32,
    pub base_opacity: f32,
    pub base_rotation: f32,
    #[serde(default)]
    pub jitter: Option<Jitter>,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            spacing_x: 200.0,
            spacing_y: 150.0,
            layers: 1,
            density: DensityMode::Normal,
            stagger: false,
            margin: 36.0,
            base_opacity: 1.0,
            base_rotation: 0.0,
            jitter: None,
        }
    }
}

/// Width/height pair in points (or pixels for raster pages).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// One computed position for drawing a rendered mark.
///
/// Coordinates are top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub layer: u32,
    pub opacity: f32,
    /// Additional rotation for this layer, in degrees.
    pub rotation_offset: f32,
}

/// Draw order of layers when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStrategy {
    /// Highest layer drawn last (on top).
    #[default]
    Overlay,
    /// Lowest layer drawn last.
    Background,
    /// Overlay on even pages, background on odd pages.
    Alternating,
    /// Stable sort by layer only.
    Mixed,
}

impl std::str::FromStr for LayerStrategy {
    type Err = TilemarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overlay" => Ok(Self::Overlay),
            "background" => Ok(Self::Background),
            "alternating" => Ok(Self::Alternating),
            "mixed" => Ok(Self::Mixed),
            other => Err(TilemarkError::Config(format!("unknown layer strategy '{other}'"))),
        }
    }
}

impl std::str::FromStr for DensityMode {
    type Err = TilemarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sparse" => Ok(Self::Sparse),
            "normal" => Ok(Self::Normal),
            "dense" => Ok(Self::Dense),
            other => Err(TilemarkError::Config(format!("unknown density '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colours() {
        assert_eq!(Rgba::parse_hex("#fff").unwrap(), Rgba::rgb(255, 255, 255));
        assert_eq!(Rgba::parse_hex("ff0000").unwrap(), Rgba::rgb(255, 0, 0));
        assert_eq!(Rgba::parse_hex("#00ff0080").unwrap().a, 0x80);
        assert!(Rgba::parse_hex("#12").is_err());
        assert!(Rgba::parse_hex("#zzzzzz").is_err());
    }

    #[test]
    fn hex_output_is_lowercase_rgb() {
        assert_eq!(Rgba::rgb(0xAB, 0x01, 0xFF).to_hex(), "#ab01ff");
    }

    #[test]
    fn validate_rejects_bad_opacity_and_size() {
        assert!(MarkSpec::text("DRAFT").with_opacity(1.5).validate().is_err());
        assert!(MarkSpec::text("DRAFT").with_opacity(-0.1).validate().is_err());
        assert!(MarkSpec::text("DRAFT").with_size(0.0).validate().is_err());
        assert!(MarkSpec::text("DRAFT").with_size(f32::NAN).validate().is_err());
        assert!(MarkSpec::text("   ").validate().is_err());
        assert!(MarkSpec::text("DRAFT").validate().is_ok());
    }

    #[test]
    fn density_factors() {
        assert_eq!(DensityMode::Sparse.factor(), 1.5);
        assert_eq!(DensityMode::Normal.factor(), 1.0);
        assert_eq!(DensityMode::Dense.factor(), 0.7);
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("Overlay".parse::<LayerStrategy>().unwrap(), LayerStrategy::Overlay);
        assert!("sideways".parse::<LayerStrategy>().is_err());
    }
}
