// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// AssetResolver: named capability -> usable binding.
//
// Resolution order for a name: cached success, unknown/cycle check, join an
// in-flight attempt, or start a new one. A new attempt resolves every
// dependency first, then walks the mirrors with per-mirror retry, links the
// payload, and verifies the expected symbol landed in the binding table.
//
// All shared state sits behind one std mutex that is never held across an
// await, so check-then-insert on the in-flight map cannot interleave.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use serde::Serialize;
use tilemark_core::config::ResolverConfig;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::{AssetDescriptor, LoadOutcome, Provenance};
use tracing::{debug, error, info, instrument, warn};

use crate::fetch::MirrorFetcher;
use crate::health::{HealthTracker, MirrorHealth};
use crate::linker::{Binding, BindingTable, ModuleLinker};
use crate::retry::{RetryDecision, RetryPolicy, should_retry};

pub const ALL_MIRRORS_FAILED: &str = "ALL_MIRRORS_FAILED";
pub const SYMBOL_MISSING: &str = "SYMBOL_MISSING";
pub const UNKNOWN_ASSET: &str = "UNKNOWN_ASSET";
pub const CIRCULAR_DEPENDENCY: &str = "CIRCULAR_DEPENDENCY";
pub const DEPENDENCY_FAILED: &str = "DEPENDENCY_FAILED";

type PendingOutcome = Shared<BoxFuture<'static, LoadOutcome>>;

/// Snapshot of resolver activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub loaded: usize,
    pub in_flight: usize,
    /// Fetch attempts issued across all mirrors.
    pub attempts: u64,
}

#[derive(Default)]
struct ResolverState {
    loaded: HashMap<String, LoadOutcome>,
    in_flight: HashMap<String, PendingOutcome>,
    bindings: BindingTable,
    health: HealthTracker,
    attempts: u64,
}

struct Inner {
    catalog: HashMap<String, AssetDescriptor>,
    fetcher: Arc<dyn MirrorFetcher>,
    linker: Arc<dyn ModuleLinker>,
    config: ResolverConfig,
    state: Mutex<ResolverState>,
}

/// Cheaply cloneable handle; clones share the same caches.
#[derive(Clone)]
pub struct AssetResolver {
    inner: Arc<Inner>,
}

impl AssetResolver {
    /// Build a resolver over a fixed catalogue.
    pub fn new(
        catalog: impl IntoIterator<Item = AssetDescriptor>,
        fetcher: Arc<dyn MirrorFetcher>,
        linker: Arc<dyn ModuleLinker>,
        config: ResolverConfig,
    ) -> Self {
        let catalog = catalog
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        Self {
            inner: Arc::new(Inner {
                catalog,
                fetcher,
                linker,
                config,
                state: Mutex::new(ResolverState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor(&self, name: &str) -> Option<&AssetDescriptor> {
        self.inner.catalog.get(name)
    }

    // -- Single resolution ----------------------------------------------------

    /// Resolve `name`, sharing any attempt already running for it.
    #[instrument(skip(self), fields(asset = %name))]
    pub async fn resolve(&self, name: &str) -> LoadOutcome {
        self.resolve_in_chain(name, Vec::new()).await
    }

    /// Like [`resolve`](Self::resolve) but as a typed `Result`.
    pub async fn require(&self, name: &str) -> Result<LoadOutcome> {
        self.resolve(name).await.into_result()
    }

    fn resolve_in_chain(&self, name: &str, chain: Vec<String>) -> BoxFuture<'static, LoadOutcome> {
        let this = self.clone();
        let name = name.to_owned();

        async move {
            let pending = {
                let mut state = this.state();

                if let Some(done) = state.loaded.get(&name) {
                    debug!(asset = %name, "asset already resolved");
                    return LoadOutcome::cached(&name, done.mirror.clone());
                }

                let Some(descriptor) = this.inner.catalog.get(&name).cloned() else {
                    warn!(asset = %name, "asset not in catalogue");
                    return LoadOutcome::failed(&name, UNKNOWN_ASSET, Default::default());
                };

                if let Some(cycle) = find_cycle(&this.inner.catalog, &chain, &name) {
                    let path = cycle.join(" -> ");
                    error!(asset = %name, cycle = %path, "circular dependency");
                    return LoadOutcome::failed(
                        &name,
                        format!("{CIRCULAR_DEPENDENCY}: {path}"),
                        Default::default(),
                    );
                }

                match state.in_flight.get(&name) {
                    Some(pending) => {
                        debug!(asset = %name, "joining in-flight resolution");
                        pending.clone()
                    }
                    None => {
                        let pending = this.clone().load(descriptor, chain).boxed().shared();
                        state.in_flight.insert(name.clone(), pending.clone());
                        pending
                    }
                }
            };

            pending.await
        }
        .boxed()
    }

    async fn load(self, descriptor: AssetDescriptor, mut chain: Vec<String>) -> LoadOutcome {
        let started = Instant::now();
        let name = descriptor.name.clone();
        chain.push(name.clone());

        for dependency in &descriptor.dependencies {
            let outcome = self.resolve_in_chain(dependency, chain.clone()).await;
            if !outcome.success {
                let reason = format!(
                    "{DEPENDENCY_FAILED}: {dependency}: {}",
                    outcome.reason.unwrap_or_default()
                );
                error!(asset = %name, dependency = %dependency, "dependency failed");
                return self.settle(LoadOutcome::failed(&name, reason, started.elapsed()));
            }
        }

        let outcome = self.try_mirrors(&descriptor, started).await;
        self.settle(outcome)
    }

    async fn try_mirrors(&self, descriptor: &AssetDescriptor, started: Instant) -> LoadOutcome {
        let name = descriptor.name.as_str();
        let policy = RetryPolicy::for_asset(descriptor, &self.inner.config);
        let mirrors = self.mirror_order(descriptor);
        let mut only_link_failures = !mirrors.is_empty();

        for (index, mirror) in mirrors.iter().enumerate() {
            let mut attempt = 0;
            loop {
                attempt += 1;
                self.state().attempts += 1;

                let attempt_started = Instant::now();
                let result = match tokio::time::timeout(
                    descriptor.timeout(),
                    self.inner.fetcher.fetch(mirror, descriptor.timeout()),
                )
                .await
                {
                    Ok(Ok(payload)) => self.link(descriptor, mirror, payload),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(TilemarkError::Timeout(descriptor.timeout_ms)),
                };
                let latency = attempt_started.elapsed();

                let err = match result {
                    Ok(()) => {
                        self.state().health.record_success(mirror, latency);
                        let provenance = if index == 0 {
                            Provenance::Network
                        } else {
                            Provenance::Fallback
                        };
                        info!(
                            asset = name,
                            mirror = %mirror,
                            attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            ?provenance,
                            "asset resolved"
                        );
                        return LoadOutcome::loaded(name, mirror, started.elapsed(), provenance);
                    }
                    Err(err) => err,
                };

                self.state().health.record_failure(mirror, &err.to_string());
                if !matches!(err, TilemarkError::AssetUnavailable { .. }) {
                    only_link_failures = false;
                }

                match should_retry(&err, attempt, &policy) {
                    RetryDecision::RetryAfter(delay) => tokio::time::sleep(delay).await,
                    RetryDecision::GiveUp(_) | RetryDecision::Exhausted => break,
                }
            }
        }

        let reason = if only_link_failures {
            format!("{SYMBOL_MISSING}: {}", descriptor.expected_symbol)
        } else {
            ALL_MIRRORS_FAILED.to_string()
        };
        error!(asset = name, reason = %reason, "asset unavailable");
        LoadOutcome::failed(name, reason, started.elapsed())
    }

    /// Link a payload and install its symbols, refusing it unless this link
    /// itself exported the expected symbol.
    fn link(&self, descriptor: &AssetDescriptor, mirror: &str, payload: Vec<u8>) -> Result<()> {
        let symbols = self.inner.linker.link(descriptor, &payload)?;
        let payload: Arc<[u8]> = payload.into();

        let mut state = self.state();
        if !symbols.iter().any(|s| *s == descriptor.expected_symbol) {
            return Err(TilemarkError::AssetUnavailable {
                name: descriptor.name.clone(),
                reason: format!("{SYMBOL_MISSING}: {}", descriptor.expected_symbol),
            });
        }

        for symbol in symbols {
            state.bindings.install(Binding {
                asset: descriptor.name.clone(),
                symbol,
                payload: Arc::clone(&payload),
                mirror: mirror.to_string(),
            });
        }
        Ok(())
    }

    /// Retire the in-flight entry and cache a success, atomically.
    fn settle(&self, outcome: LoadOutcome) -> LoadOutcome {
        let mut state = self.state();
        state.in_flight.remove(&outcome.name);
        if outcome.success {
            state.loaded.insert(outcome.name.clone(), outcome.clone());
        }
        outcome
    }

    fn mirror_order(&self, descriptor: &AssetDescriptor) -> Vec<String> {
        if self.inner.config.prefer_healthy_mirrors {
            self.state().health.rank(&descriptor.mirrors)
        } else {
            descriptor.mirrors.clone()
        }
    }

    // -- Batch ----------------------------------------------------------------

    /// Resolve several names plus their transitive dependencies.
    ///
    /// Names are sorted by descending priority (ties by name) and run in
    /// waves of at most `max_concurrent`.
    #[instrument(skip(self, names))]
    pub async fn resolve_many<I, S>(&self, names: I, max_concurrent: usize) -> Vec<LoadOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered: Vec<String> = self.closure(names).into_iter().collect();
        ordered.sort_by(|a, b| {
            let pa = self.descriptor(a).map_or(0, |d| d.priority);
            let pb = self.descriptor(b).map_or(0, |d| d.priority);
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });

        let wave_size = max_concurrent.max(1);
        info!(total = ordered.len(), wave_size, "batch resolution started");

        let mut outcomes = Vec::with_capacity(ordered.len());
        for wave in ordered.chunks(wave_size) {
            let results = join_all(wave.iter().map(|name| self.resolve(name))).await;
            outcomes.extend(results);
        }
        outcomes
    }

    /// Batch resolution with the configured concurrency cap.
    pub async fn resolve_all<I, S>(&self, names: I) -> Vec<LoadOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolve_many(names, self.inner.config.max_concurrent).await
    }

    fn closure<I, S>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut stack: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(descriptor) = self.inner.catalog.get(&name) {
                stack.extend(descriptor.dependencies.iter().cloned());
            }
        }
        seen
    }

    // -- Queries --------------------------------------------------------------

    /// Best mirror for `name` by health score.
    pub fn recommended_mirror(&self, name: &str) -> Option<String> {
        let descriptor = self.inner.catalog.get(name)?;
        self.state().health.recommended(&descriptor.mirrors)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state().loaded.contains_key(name)
    }

    pub fn binding(&self, symbol: &str) -> Option<Binding> {
        self.state().bindings.get(symbol).cloned()
    }

    pub fn bindings_with_prefix(&self, prefix: &str) -> Vec<Binding> {
        self.state().bindings.with_prefix(prefix)
    }

    pub fn health(&self, mirror: &str) -> Option<MirrorHealth> {
        self.state().health.get(mirror).cloned()
    }

    pub fn stats(&self) -> ResolverStats {
        let state = self.state();
        ResolverStats {
            loaded: state.loaded.len(),
            in_flight: state.in_flight.len(),
            attempts: state.attempts,
        }
    }

    /// Forget a cached success so the next `resolve` fetches again.
    pub fn reset(&self, name: &str) {
        let mut state = self.state();
        state.loaded.remove(name);
        state.bindings.remove_asset(name);
        debug!(asset = name, "asset reset");
    }
}

/// Path of the first cycle reachable from `name`, given the ancestors in
/// `chain`. The catalogue is fixed, so a cycle found here is permanent.
fn find_cycle(
    catalog: &HashMap<String, AssetDescriptor>,
    chain: &[String],
    name: &str,
) -> Option<Vec<String>> {
    fn walk(
        catalog: &HashMap<String, AssetDescriptor>,
        path: &mut Vec<String>,
        name: &str,
        finished: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|n| n == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if finished.contains(name) {
            return None;
        }
        path.push(name.to_string());
        if let Some(descriptor) = catalog.get(name) {
            for dependency in &descriptor.dependencies {
                if let Some(cycle) = walk(catalog, path, dependency, finished) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        finished.insert(name.to_string());
        None
    }

    let mut path = chain.to_vec();
    walk(catalog, &mut path, name, &mut HashSet::new())
}
