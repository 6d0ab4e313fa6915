// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tamper-evidence stamp: digest of the finished artifact, signed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tilemark_core::error::TilemarkError;
use tracing::{debug, instrument};

use crate::integrity::{DigestAlgorithm, digest};
use crate::signing::{Signer, verify_signature};

/// Record attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperStamp {
    pub algorithm: DigestAlgorithm,
    /// Hex digest of the artifact bytes.
    pub digest: String,
    /// Hex DER signature over `signed_message()`.
    pub signature: String,
    /// Hex public key of the signer.
    pub public_key: String,
    pub stamped_at: DateTime<Utc>,
}

impl TamperStamp {
    /// The exact bytes that were signed: `"<algorithm>:<digest>:<rfc3339>"`.
    pub fn signed_message(&self) -> Vec<u8> {
        message(self.algorithm, &self.digest, &self.stamped_at)
    }
}

fn message(algorithm: DigestAlgorithm, digest_hex: &str, at: &DateTime<Utc>) -> Vec<u8> {
    format!("{}:{}:{}", algorithm.name(), digest_hex, at.to_rfc3339()).into_bytes()
}

/// Digest `artifact` and sign the digest.
#[instrument(skip_all, fields(bytes = artifact.len(), algorithm = algorithm.name()))]
pub fn stamp(
    artifact: &[u8],
    algorithm: DigestAlgorithm,
    signer: &dyn Signer,
) -> Result<TamperStamp, TilemarkError> {
    let digest_hex = digest(artifact, algorithm);
    let stamped_at = Utc::now();
    let signature = signer.sign(&message(algorithm, &digest_hex, &stamped_at))?;

    debug!(digest = %digest_hex, "artifact stamped");
    Ok(TamperStamp {
        algorithm,
        digest: digest_hex,
        signature: hex::encode(signature),
        public_key: hex::encode(signer.public_key()),
        stamped_at,
    })
}

/// Check that `artifact` still matches `stamp` and the signature holds.
pub fn verify_stamp(artifact: &[u8], stamp: &TamperStamp) -> Result<(), TilemarkError> {
    let actual = digest(artifact, stamp.algorithm);
    if actual != stamp.digest {
        return Err(TilemarkError::IntegrityMismatch {
            expected: stamp.digest.clone(),
            actual,
        });
    }
    let public_key = hex::decode(&stamp.public_key)
        .map_err(|e| TilemarkError::Signing(format!("bad public key hex: {e}")))?;
    let signature = hex::decode(&stamp.signature)
        .map_err(|e| TilemarkError::Signing(format!("bad signature hex: {e}")))?;
    verify_signature(&public_key, &stamp.signed_message(), &signature)
}
