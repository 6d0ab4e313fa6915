// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory output artifacts behind revocable handles. Nothing is written
// to disk here; front ends fetch the bytes and decide what to do with them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tilemark_core::types::ArtifactHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Artifact {
    pub handle: ArtifactHandle,
    /// Suggested file name for the output.
    pub name: String,
    pub bytes: Arc<[u8]>,
    pub mime_type: &'static str,
    pub created_at: DateTime<Utc>,
}

/// Shared handle table. Clones see the same artifacts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    entries: Arc<Mutex<HashMap<ArtifactHandle, Artifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>, mime_type: &'static str) -> ArtifactHandle {
        let handle = ArtifactHandle::new();
        let artifact = Artifact {
            handle,
            name: name.into(),
            bytes: bytes.into(),
            mime_type,
            created_at: Utc::now(),
        };
        debug!(%handle, name = %artifact.name, bytes = artifact.bytes.len(), "artifact stored");
        self.lock().insert(handle, artifact);
        handle
    }

    pub fn get(&self, handle: ArtifactHandle) -> Option<Artifact> {
        self.lock().get(&handle).cloned()
    }

    /// Drop the artifact. Returns `false` if the handle was already gone.
    pub fn revoke(&self, handle: ArtifactHandle) -> bool {
        let removed = self.lock().remove(&handle).is_some();
        if removed {
            debug!(%handle, "artifact revoked");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().values().map(|a| a.bytes.len()).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactHandle, Artifact>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
