// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capabilities compiled into the binary and served from `mem://` mirrors.
//
// A configured catalogue can list extra mirrors for the same names; the
// embedded mirror is appended last so it only answers when nothing else does.

use tilemark_core::types::AssetDescriptor;

use crate::fetch::MemoryFetcher;
use crate::linker::StaticLinker;

pub const PDF_CODEC: &str = "pdf-codec";
pub const RASTER_CODEC: &str = "raster-codec";
pub const DOCX_CONVERTER: &str = "docx-converter";

/// Symbol prefix for font data assets.
pub const FONT_PREFIX: &str = "font:";

const BUILTINS: &[(&str, &str, i32, &[&str])] = &[
    (PDF_CODEC, "PdfCodec", 10, &[]),
    (RASTER_CODEC, "RasterCodec", 10, &[]),
    (DOCX_CONVERTER, "DocxConverter", 5, &[PDF_CODEC]),
];

/// `mem://` mirror a built-in capability is served from.
pub fn builtin_mirror(name: &str) -> String {
    format!("mem://builtin/{name}")
}

/// Merge the built-in descriptors into `configured`.
pub fn with_builtin_catalog(mut configured: Vec<AssetDescriptor>) -> Vec<AssetDescriptor> {
    for &(name, symbol, priority, deps) in BUILTINS {
        match configured.iter_mut().find(|d| d.name == name) {
            Some(existing) => {
                let mirror = builtin_mirror(name);
                if !existing.mirrors.contains(&mirror) {
                    existing.mirrors.push(mirror);
                }
            }
            None => {
                let mut descriptor = AssetDescriptor::new(name, symbol)
                    .with_mirror(builtin_mirror(name))
                    .with_priority(priority)
                    .with_retry_attempts(1);
                for dep in deps {
                    descriptor = descriptor.with_dependency(*dep);
                }
                configured.push(descriptor);
            }
        }
    }
    configured
}

/// Seed `memory` with a payload for every built-in capability.
pub fn seed_builtin_payloads(memory: &MemoryFetcher) {
    for &(name, symbol, _, _) in BUILTINS {
        memory.insert(builtin_mirror(name), format!("tilemark builtin {symbol}").into_bytes());
    }
}

/// Linker knowing every built-in capability, with fonts treated as data.
pub fn builtin_linker() -> StaticLinker {
    BUILTINS
        .iter()
        .fold(StaticLinker::new().data_prefix(FONT_PREFIX), |linker, &(name, symbol, _, _)| {
            linker.provide(name, [symbol])
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tilemark_core::config::ResolverConfig;

    use super::*;
    use crate::resolver::AssetResolver;

    #[tokio::test]
    async fn builtins_resolve_from_memory() {
        let memory = Arc::new(MemoryFetcher::new());
        seed_builtin_payloads(&memory);
        let resolver = AssetResolver::new(
            with_builtin_catalog(Vec::new()),
            memory,
            Arc::new(builtin_linker()),
            ResolverConfig::default(),
        );

        let outcome = resolver.resolve(DOCX_CONVERTER).await;
        assert!(outcome.success, "{outcome:?}");
        assert!(resolver.is_loaded(PDF_CODEC));
        assert!(resolver.binding("DocxConverter").is_some());
    }

    #[test]
    fn configured_mirrors_come_first() {
        let configured = vec![
            AssetDescriptor::new(PDF_CODEC, "PdfCodec").with_mirror("https://cdn.example/pdf"),
        ];
        let catalog = with_builtin_catalog(configured);
        let pdf = catalog.iter().find(|d| d.name == PDF_CODEC).unwrap();
        assert_eq!(pdf.mirrors, vec!["https://cdn.example/pdf", "mem://builtin/pdf-codec"]);
        assert_eq!(catalog.len(), 3);
    }
}
