// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark core: types, configuration and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod mark;
pub mod types;

pub use config::TilemarkConfig;
pub use error::TilemarkError;
pub use mark::*;
pub use types::*;
