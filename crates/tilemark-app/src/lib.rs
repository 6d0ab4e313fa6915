// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark application layer: the single `process_document` entry point,
// progress streams, and transient output artifacts.

pub mod services;

pub use services::artifacts::{Artifact, ArtifactStore};
pub use services::progress::{ProgressEvent, ProgressReceiver, ProgressSender, progress_channel};
pub use services::watermark_service::{ProcessOptions, ProcessedDocument, WatermarkService};
