// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: wires the resolver, renderer, conversion cascade and
// merger into one call that front ends can drive.

pub mod artifacts;
pub mod progress;
pub mod watermark_service;
