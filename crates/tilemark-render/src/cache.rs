// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded render cache keyed by a digest of the canonical request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tilemark_core::config::RenderConfig;
use tilemark_core::mark::{MarkContent, MarkSpec};
use tilemark_security::{hash_bytes, hash_parts};

use crate::mark::RenderedMark;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// FIFO map from request key to finished render. The oldest entry is
/// dropped once `capacity` is exceeded.
#[derive(Debug)]
pub struct RenderCache {
    map: HashMap<String, Arc<RenderedMark>>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl RenderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Arc<RenderedMark>> {
        match self.map.get(key) {
            Some(mark) => {
                self.hits = self.hits.saturating_add(1);
                Some(Arc::clone(mark))
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, mark: Arc<RenderedMark>) {
        if self.capacity == 0 || self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), mark);
        self.order.push_back(key);
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.map.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Deterministic key over everything that changes the rendered output.
pub fn render_key(spec: &MarkSpec, config: &RenderConfig) -> String {
    let content = match &spec.content {
        MarkContent::Text(text) => format!("text:{text}"),
        MarkContent::Image(bytes) => format!("image:{}", hash_bytes(bytes)),
    };
    let style = format!(
        "fonts={};size={};color={}{:02x};opacity={};rotation={};scale={:?}",
        spec.font_families.join(","),
        spec.size,
        spec.color.to_hex(),
        spec.color.a,
        spec.opacity,
        spec.rotation,
        spec.scale,
    );
    let output = format!(
        "format=png{};dpi={};padding={}",
        if config.include_svg { "+svg" } else { "" },
        config.dpi,
        config.padding_px
    );
    hash_parts([content.as_bytes(), style.as_bytes(), output.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(tag: u8) -> Arc<RenderedMark> {
        Arc::new(RenderedMark {
            png: vec![tag],
            svg: None,
            width: 1,
            height: 1,
            cache_key: tag.to_string(),
        })
    }

    #[test]
    fn counts_hits_and_misses() {
        let mut cache = RenderCache::new(4);
        assert!(cache.get("a").is_none());
        cache.insert("a".into(), mark(1));
        assert_eq!(cache.get("a").unwrap().png, vec![1]);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn oldest_entry_dropped_on_overflow() {
        let mut cache = RenderCache::new(2);
        cache.insert("a".into(), mark(1));
        cache.insert("b".into(), mark(2));
        cache.insert("c".into(), mark(3));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn key_changes_with_style_and_output() {
        let config = RenderConfig::default();
        let spec = MarkSpec::text("DRAFT");
        let base = render_key(&spec, &config);
        assert_eq!(base, render_key(&spec.clone(), &config));
        assert_ne!(base, render_key(&spec.clone().with_opacity(0.5), &config));
        assert_ne!(
            base,
            render_key(
                &spec,
                &RenderConfig {
                    dpi: 300.0,
                    ..RenderConfig::default()
                }
            )
        );
    }
}
