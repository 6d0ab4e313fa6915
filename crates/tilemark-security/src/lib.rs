// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark security: digests, signing, and tamper-evidence stamps.
//
// The conversion core only consumes `digest` and `Signer::sign`; failures
// here never fail a watermark job, they only drop the stamp.

pub mod integrity;
pub mod signing;
pub mod stamp;

pub use integrity::{DigestAlgorithm, digest, hash_bytes, hash_parts, verify_hash};
pub use signing::{Signer, SigningKey, verify_signature};
pub use stamp::{TamperStamp, stamp, verify_stamp};
