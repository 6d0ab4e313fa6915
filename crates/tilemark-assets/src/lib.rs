// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark assets: resolves named capabilities across mirrors with
// dependency ordering, retry, health tracking, and in-flight de-duplication.

pub mod builtin;
pub mod fetch;
pub mod health;
pub mod linker;
pub mod resolver;
pub mod retry;

pub use fetch::{FileFetcher, HttpFetcher, MemoryFetcher, MirrorFetcher, RoutingFetcher};
pub use health::{HealthTracker, MirrorHealth};
pub use linker::{Binding, BindingTable, ModuleLinker, StaticLinker};
pub use resolver::{AssetResolver, ResolverStats};
pub use retry::{RetryDecision, RetryPolicy};
