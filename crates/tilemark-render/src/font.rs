// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Font book: registration, measurement, probing, and per-character fallback.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use tilemark_assets::Binding;
use tilemark_assets::builtin::FONT_PREFIX;
use tilemark_core::error::{Result, TilemarkError};
use tracing::{debug, warn};

/// Fixed string used to score how plausible a family's metrics are.
pub const PROBE_TEXT: &str = "Watermark Probe 0123";

/// Expected probe advance per character, as a fraction of the font size.
const PROBE_EXPECTED_EM: f32 = 0.55;

/// Per-character width when no font is available.
const FALLBACK_CHAR_EM: f32 = 0.6;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct WidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct WidthCache {
    map: HashMap<WidthKey, f32>,
    order: VecDeque<WidthKey>,
    max_entries: usize,
}

impl WidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &WidthKey) -> Option<f32> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: WidthKey, value: f32) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug)]
pub struct RegisteredFont {
    pub name: String,
    pub data: Arc<[u8]>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
}

/// A span of text drawn with one family. `family` is `None` when nothing in
/// the chain resolved; such runs are measured but not drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRun {
    pub family: Option<String>,
    pub text: String,
}

/// One shaped glyph, positioned relative to the run origin in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphPlacement {
    pub glyph_id: u16,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug)]
pub struct FontBook {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    width_cache: Mutex<WidthCache>,
}

impl Default for FontBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FontBook {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            width_cache: Mutex::new(WidthCache::new(4_096)),
        }
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Primary names in registration order.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.fonts.iter().map(|f| f.name.as_str())
    }

    // -- Registration ---------------------------------------------------------

    /// Register a TrueType/OpenType face. Returns its primary name.
    pub fn register_bytes(&mut self, data: Vec<u8>, source_name: Option<&str>) -> Result<String> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|e| TilemarkError::FontError(format!("invalid font data for {source}: {e}")))?;

        let (name, aliases) = font_names(&face, source);
        let units_per_em = face.units_per_em();
        let ascender = face.ascender();
        let descender = face.descender();

        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data: data.into(),
            units_per_em,
            ascender,
            descender,
        });

        for alias in std::iter::once(name.clone()).chain(aliases) {
            self.add_alias(&alias, index);
        }
        debug!(font = %name, "font registered");
        Ok(name)
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let stem = path.file_stem().and_then(|v| v.to_str());
        self.register_bytes(data, stem)
    }

    /// Register every `.ttf` / `.otf` in `path`. Unreadable files are skipped.
    pub fn register_dir(&mut self, path: impl AsRef<Path>) -> usize {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            warn!(dir = %path.as_ref().display(), "font directory unreadable");
            return 0;
        };
        let mut registered = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_font = path
                .extension()
                .and_then(|v| v.to_str())
                .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"));
            if is_font && path.is_file() && self.register_file(&path).is_ok() {
                registered += 1;
            }
        }
        registered
    }

    /// Register font data delivered as `font:<Family>` asset bindings. The
    /// family in the symbol becomes an extra alias.
    pub fn register_bindings(&mut self, bindings: &[Binding]) -> usize {
        let mut registered = 0;
        for binding in bindings {
            let Some(family) = binding.symbol.strip_prefix(FONT_PREFIX) else {
                continue;
            };
            match self.register_bytes(binding.payload.to_vec(), Some(family)) {
                Ok(_) => {
                    self.add_alias(family, self.fonts.len() - 1);
                    registered += 1;
                }
                Err(err) => warn!(asset = %binding.asset, error = %err, "font binding rejected"),
            }
        }
        registered
    }

    fn add_alias(&mut self, alias: &str, index: usize) {
        let key = normalize_name(alias);
        if !key.is_empty() {
            self.lookup.entry(key).or_insert(index);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        self.index_of(name).and_then(|i| self.fonts.get(i))
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(&normalize_name(name)).copied()
    }

    // -- Metrics --------------------------------------------------------------

    pub fn supports_char(&self, name: &str, ch: char) -> bool {
        self.resolve(name)
            .and_then(|font| ttf_parser::Face::parse(&font.data, 0).ok())
            .is_some_and(|face| face.glyph_index(ch).is_some())
    }

    /// Advance width of `text` in pixels at `size`.
    ///
    /// Unknown families measure `0.6 × size` per character.
    pub fn measure(&self, name: &str, size: f32, text: &str) -> f32 {
        let fallback = size * FALLBACK_CHAR_EM * text.chars().count() as f32;
        let Some(index) = self.index_of(name) else {
            return fallback;
        };

        let key = WidthKey {
            font_index: index,
            size_milli: (size * 1000.0).round() as i64,
            text: text.to_string(),
        };
        if let Ok(cache) = self.width_cache.lock()
            && let Some(value) = cache.get(&key)
        {
            return value;
        }

        let value = self
            .fonts
            .get(index)
            .and_then(|font| shaped_width(font, size, text))
            .unwrap_or(fallback);
        if let Ok(mut cache) = self.width_cache.lock() {
            cache.insert(key, value);
        }
        value
    }

    /// Total advance of a set of runs.
    pub fn measure_runs(&self, runs: &[FontRun], size: f32) -> f32 {
        runs.iter()
            .map(|run| match &run.family {
                Some(family) => self.measure(family, size, &run.text),
                None => size * FALLBACK_CHAR_EM * run.text.chars().count() as f32,
            })
            .sum()
    }

    /// `(ascent, descent)` in pixels, both positive.
    pub fn line_metrics(&self, name: &str, size: f32) -> (f32, f32) {
        match self.resolve(name) {
            Some(font) => {
                let scale = size / f32::from(font.units_per_em.max(1));
                (
                    f32::from(font.ascender) * scale,
                    -f32::from(font.descender) * scale,
                )
            }
            None => (size * 0.8, size * 0.2),
        }
    }

    /// Shape `text` with `name`, returning glyph origins relative to the
    /// start of the baseline.
    pub fn layout_glyphs(&self, name: &str, size: f32, text: &str) -> Vec<GlyphPlacement> {
        let Some(font) = self.resolve(name) else {
            return Vec::new();
        };
        let Some(face) = HbFace::from_slice(&font.data, 0) else {
            return Vec::new();
        };
        let upem = f32::from(face.units_per_em().max(1) as u16);
        let scale = size / upem;

        let mut buffer = UnicodeBuffer::new();
        buffer.set_direction(detect_direction(text));
        buffer.push_str(text);
        let output = rustybuzz::shape(&face, &[], buffer);

        let mut pen_x = 0.0_f32;
        let mut out = Vec::with_capacity(output.len());
        for (info, pos) in output.glyph_infos().iter().zip(output.glyph_positions()) {
            let glyph_id = info.glyph_id as u16;
            if glyph_id != 0 {
                out.push(GlyphPlacement {
                    glyph_id,
                    x: pen_x + pos.x_offset as f32 * scale,
                    y: -(pos.y_offset as f32) * scale,
                });
            }
            pen_x += pos.x_advance as f32 * scale;
        }
        out
    }

    // -- Fallback selection ---------------------------------------------------

    /// Width plausibility of `name`: `1 − |w − expected| / expected` where
    /// `expected = 0.55 × size × chars` of the probe string.
    pub fn probe_score(&self, name: &str, size: f32) -> f32 {
        let expected = PROBE_EXPECTED_EM * size * PROBE_TEXT.chars().count() as f32;
        if expected <= 0.0 {
            return 0.0;
        }
        let width = self.measure(name, size, PROBE_TEXT);
        1.0 - (width - expected).abs() / expected
    }

    /// Pick the best registered family in `chain` for `text`: probe score
    /// plus the fraction of non-space characters it covers. Earlier
    /// families win ties.
    pub fn select_primary(&self, chain: &[String], text: &str, size: f32) -> Option<String> {
        let glyphs: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        let mut best: Option<(f32, &String)> = None;
        for family in chain.iter().filter(|f| self.resolve(f).is_some()) {
            let coverage = if glyphs.is_empty() {
                1.0
            } else {
                glyphs.iter().filter(|&&c| self.supports_char(family, c)).count() as f32
                    / glyphs.len() as f32
            };
            let score = self.probe_score(family, size) + coverage;
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, family));
            }
        }
        best.map(|(_, family)| family.clone())
    }

    /// Split `text` into runs, giving each character to the first family in
    /// `primary` then `fallbacks` that has a glyph for it.
    pub fn split_runs(&self, primary: Option<&str>, fallbacks: &[String], text: &str) -> Vec<FontRun> {
        let stack: Vec<&str> = primary
            .into_iter()
            .chain(fallbacks.iter().map(String::as_str))
            .filter(|f| self.resolve(f).is_some())
            .collect();
        let default = stack.first().map(|f| f.to_string());

        let mut support_cache: HashMap<(usize, char), bool> = HashMap::new();
        let mut runs: Vec<FontRun> = Vec::new();
        for ch in text.chars() {
            let chosen = stack
                .iter()
                .enumerate()
                .find(|(idx, family)| {
                    *support_cache
                        .entry((*idx, ch))
                        .or_insert_with(|| self.supports_char(family, ch))
                })
                .map(|(_, family)| family.to_string())
                .or_else(|| default.clone());

            match runs.last_mut() {
                Some(run) if run.family == chosen => run.text.push(ch),
                _ => runs.push(FontRun {
                    family: chosen,
                    text: ch.to_string(),
                }),
            }
        }
        runs
    }
}

fn shaped_width(font: &RegisteredFont, size: f32, text: &str) -> Option<f32> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let upem = face.units_per_em().max(1) as f32;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let units: i64 = positions.iter().map(|p| i64::from(p.x_advance)).sum();
    Some((units.max(0) as f32) * size / upem)
}

fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

fn font_names(face: &ttf_parser::Face<'_>, source: &str) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY if family.is_none() => family = Some(name),
            name_id::FULL_NAME if full.is_none() => full = Some(name),
            name_id::POST_SCRIPT_NAME if post.is_none() => post = Some(name),
            _ => {}
        }
    }

    let primary = family
        .clone()
        .or_else(|| full.clone())
        .or_else(|| post.clone())
        .unwrap_or_else(|| source.to_string());

    let aliases = [family, full, post, Some(source.to_string())]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate != primary)
        .collect();
    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_family_uses_fallback_width() {
        let book = FontBook::new();
        assert!((book.measure("Nope", 10.0, "abcd") - 24.0).abs() < 1e-4);
        let (ascent, descent) = book.line_metrics("Nope", 10.0);
        assert!((ascent - 8.0).abs() < 1e-4 && (descent - 2.0).abs() < 1e-4);
    }

    #[test]
    fn invalid_font_bytes_rejected() {
        let mut book = FontBook::new();
        assert!(matches!(
            book.register_bytes(b"not a font".to_vec(), Some("Broken")),
            Err(TilemarkError::FontError(_))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn no_fonts_means_single_unassigned_run() {
        let book = FontBook::new();
        let runs = book.split_runs(Some("Helvetica"), &["Noto Sans".into()], "DRAFT");
        assert_eq!(
            runs,
            vec![FontRun {
                family: None,
                text: "DRAFT".into()
            }]
        );
        assert_eq!(book.select_primary(&["Helvetica".into()], "DRAFT", 12.0), None);
    }

    #[test]
    fn probe_score_for_fallback_metrics() {
        let book = FontBook::new();
        // Fallback width 0.6/em vs expected 0.55/em: 1 - 0.05/0.55.
        let score = book.probe_score("Nope", 20.0);
        assert!((score - (1.0 - 0.05 / 0.55)).abs() < 1e-4);
    }

    #[test]
    fn width_cache_drops_oldest() {
        let mut cache = WidthCache::new(2);
        let key = |t: &str| WidthKey {
            font_index: 0,
            size_milli: 1000,
            text: t.into(),
        };
        cache.insert(key("a"), 1.0);
        cache.insert(key("b"), 2.0);
        cache.insert(key("c"), 3.0);
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("c")), Some(3.0));
    }

    #[test]
    fn missing_font_dir_registers_nothing() {
        let mut book = FontBook::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "x").unwrap();
        std::fs::write(dir.path().join("broken.ttf"), "x").unwrap();
        assert_eq!(book.register_dir(dir.path()), 0);
        assert_eq!(book.register_dir(dir.path().join("missing")), 0);
    }
}
