// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability registry: turns fetched payloads into named bindings.
//
// Nothing fetched is ever executed. A linker inspects the payload and
// reports which symbols the asset provides; the resolver installs those
// into its binding table and then checks the expected symbol is there.

use std::collections::HashMap;
use std::sync::Arc;

use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::AssetDescriptor;

/// Maps a fetched payload to the symbols it exports.
pub trait ModuleLinker: Send + Sync {
    fn link(&self, descriptor: &AssetDescriptor, payload: &[u8]) -> Result<Vec<String>>;
}

/// Linker for capabilities compiled into the binary.
///
/// The payload only proves the mirror is reachable and serving the module;
/// the symbols come from the startup registration. Assets whose expected
/// symbol carries a registered data prefix (e.g. `font:`) export that
/// symbol directly with their payload as the value.
#[derive(Debug, Clone, Default)]
pub struct StaticLinker {
    provided: HashMap<String, Vec<String>>,
    data_prefixes: Vec<String>,
}

impl StaticLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the symbols the statically linked `asset` provides.
    pub fn provide<I, S>(mut self, asset: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provided
            .insert(asset.into(), symbols.into_iter().map(Into::into).collect());
        self
    }

    /// Treat assets whose expected symbol starts with `prefix` as plain data.
    pub fn data_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.data_prefixes.push(prefix.into());
        self
    }
}

impl ModuleLinker for StaticLinker {
    fn link(&self, descriptor: &AssetDescriptor, payload: &[u8]) -> Result<Vec<String>> {
        if payload.is_empty() {
            return Err(link_error(descriptor, "LINK_FAILED: empty payload"));
        }

        if self
            .data_prefixes
            .iter()
            .any(|prefix| descriptor.expected_symbol.starts_with(prefix.as_str()))
        {
            return Ok(vec![descriptor.expected_symbol.clone()]);
        }

        self.provided
            .get(&descriptor.name)
            .cloned()
            .ok_or_else(|| link_error(descriptor, "LINK_FAILED: no implementation registered"))
    }
}

fn link_error(descriptor: &AssetDescriptor, reason: &str) -> TilemarkError {
    TilemarkError::AssetUnavailable {
        name: descriptor.name.clone(),
        reason: reason.to_string(),
    }
}

// -- Binding table ------------------------------------------------------------

/// One installed symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub asset: String,
    pub symbol: String,
    pub payload: Arc<[u8]>,
    pub mirror: String,
}

/// Resolver-owned symbol namespace.
#[derive(Debug, Default)]
pub struct BindingTable {
    symbols: HashMap<String, Binding>,
}

impl BindingTable {
    pub fn install(&mut self, binding: Binding) {
        self.symbols.insert(binding.symbol.clone(), binding);
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Binding> {
        self.symbols.get(symbol)
    }

    /// Bindings whose symbol starts with `prefix`, sorted by symbol.
    pub fn with_prefix(&self, prefix: &str) -> Vec<Binding> {
        let mut found: Vec<Binding> = self
            .symbols
            .values()
            .filter(|b| b.symbol.starts_with(prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        found
    }

    /// Drop every symbol installed by `asset`.
    pub fn remove_asset(&mut self, asset: &str) {
        self.symbols.retain(|_, b| b.asset != asset);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
