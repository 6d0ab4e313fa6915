// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration, loaded from JSON with every field defaulted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TilemarkError};
use crate::mark::LayerStrategy;
use crate::types::{AssetDescriptor, PaperSize};

/// Asset resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum resolutions running at once in batch mode.
    pub max_concurrent: usize,
    /// Backoff unit; attempt `n` waits `n × base`.
    pub base_backoff_ms: u64,
    /// Upper bound on a single backoff.
    pub max_backoff_ms: u64,
    /// Try mirrors in health-score order instead of declaration order.
    pub prefer_healthy_mirrors: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 5_000,
            prefer_healthy_mirrors: false,
        }
    }
}

impl ResolverConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Surface pool and memory manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on live surfaces.
    pub max_pool_size: usize,
    /// Idle surfaces kept for reuse; extras are disposed on release.
    pub max_idle: usize,
    /// Byte budget tracked by the memory manager.
    pub memory_budget_bytes: u64,
    /// Background sweep period.
    pub sweep_interval_ms: u64,
    /// Fraction of the budget that triggers eviction.
    pub high_water: f64,
    /// Fraction of the budget eviction stops at.
    pub low_water: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            max_idle: 10,
            memory_budget_bytes: 256 * 1024 * 1024,
            sweep_interval_ms: 30_000,
            high_water: 0.8,
            low_water: 0.6,
        }
    }
}

/// Mark renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum cached renders; oldest dropped first.
    pub cache_capacity: usize,
    /// Raster export resolution.
    pub dpi: f32,
    /// Transparent border around the mark, in pixels.
    pub padding_px: u32,
    /// Directories scanned for `.ttf` / `.otf` files at startup.
    pub font_dirs: Vec<PathBuf>,
    /// Families appended to every mark's font chain.
    pub fallback_families: Vec<String>,
    /// Also produce an SVG rendition.
    pub include_svg: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            dpi: 144.0,
            padding_px: 4,
            font_dirs: Vec::new(),
            fallback_families: vec!["Noto Sans".into(), "DejaVu Sans".into()],
            include_svg: false,
        }
    }
}

/// Conversion cascade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Budget for the structure-preserving conversion.
    pub native_timeout_ms: u64,
    /// Attempt native conversion for word-processor inputs.
    pub preserve_format: bool,
    /// Page size for synthesised documents.
    pub paper_size: PaperSize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            native_timeout_ms: 15_000,
            preserve_format: true,
            paper_size: PaperSize::A4,
        }
    }
}

impl PipelineConfig {
    pub fn native_timeout(&self) -> Duration {
        Duration::from_millis(self.native_timeout_ms)
    }
}

/// Layer merger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub strategy: LayerStrategy,
    /// Run stream compression on the finished PDF.
    pub compress_output: bool,
    /// Attach a digest + signature record to successful results.
    pub stamp_integrity: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: LayerStrategy::Overlay,
            compress_output: true,
            stamp_integrity: false,
        }
    }
}

/// Complete Tilemark configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TilemarkConfig {
    pub resolver: ResolverConfig,
    pub pool: PoolConfig,
    pub render: RenderConfig,
    pub pipeline: PipelineConfig,
    pub merge: MergeConfig,
    /// Asset catalogue, fixed at startup.
    pub assets: Vec<AssetDescriptor>,
}

impl TilemarkConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject settings that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.resolver.max_concurrent == 0 {
            return Err(TilemarkError::Config("resolver.max_concurrent must be > 0".into()));
        }
        if self.pool.max_pool_size == 0 {
            return Err(TilemarkError::Config("pool.max_pool_size must be > 0".into()));
        }
        let (low, high) = (self.pool.low_water, self.pool.high_water);
        if !(0.0 < low && low < high && high <= 1.0) {
            return Err(TilemarkError::Config(format!(
                "pool water marks must satisfy 0 < low ({low}) < high ({high}) <= 1"
            )));
        }
        if self.render.dpi <= 0.0 {
            return Err(TilemarkError::Config("render.dpi must be > 0".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.name.as_str()) {
                return Err(TilemarkError::Config(format!(
                    "asset '{}' declared twice",
                    asset.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TilemarkConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TilemarkConfig =
            serde_json::from_str(r#"{"pool":{"max_pool_size":4},"merge":{"strategy":"background"}}"#)
                .unwrap();
        assert_eq!(config.pool.max_pool_size, 4);
        assert_eq!(config.pool.high_water, 0.8);
        assert_eq!(config.merge.strategy, LayerStrategy::Background);
        assert_eq!(config.resolver.max_concurrent, 3);
    }

    #[test]
    fn inverted_water_marks_rejected() {
        let mut config = TilemarkConfig::default();
        config.pool.low_water = 0.9;
        assert!(matches!(config.validate(), Err(TilemarkError::Config(_))));
    }

    #[test]
    fn duplicate_assets_rejected() {
        let mut config = TilemarkConfig::default();
        config.assets.push(AssetDescriptor::new("a", "A"));
        config.assets.push(AssetDescriptor::new("a", "A"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tilemark.json");
        let mut config = TilemarkConfig::default();
        config.pool.max_pool_size = 7;
        config.save(&path).unwrap();
        assert_eq!(TilemarkConfig::load(&path).unwrap().pool.max_pool_size, 7);
    }
}
