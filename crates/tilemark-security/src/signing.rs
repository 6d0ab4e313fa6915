// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ECDSA P-256 signing key for tamper-evidence stamps.
//
// The key lives only for the process lifetime unless the caller exports the
// PKCS#8 document and feeds it back through `SigningKey::from_pkcs8`.

use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair,
    UnparsedPublicKey,
};
use tilemark_core::error::TilemarkError;
use tracing::{debug, instrument};

/// Anything that can sign a byte string.
pub trait Signer: Send + Sync {
    /// Sign `message`, returning a DER-encoded signature.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, TilemarkError>;

    /// Public key matching the signatures (uncompressed SEC1 for P-256).
    fn public_key(&self) -> &[u8];
}

/// An ECDSA P-256 key pair.
pub struct SigningKey {
    /// PKCS#8 v1 DER-encoded private key (includes the public key).
    pkcs8_der: Vec<u8>,
    /// Uncompressed SEC1 public key bytes.
    public_key_der: Vec<u8>,
}

impl SigningKey {
    /// Generate a fresh key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self, TilemarkError> {
        let rng = SystemRandom::new();

        let pkcs8_document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| TilemarkError::Signing(format!("key generation failed: {e}")))?;

        let key = Self::from_pkcs8(pkcs8_document.as_ref())?;
        debug!(
            pkcs8_len = key.pkcs8_der.len(),
            pubkey_len = key.public_key_der.len(),
            "ECDSA P-256 key pair generated"
        );
        Ok(key)
    }

    /// Load a key pair from a PKCS#8 v1 DER document.
    pub fn from_pkcs8(pkcs8_der: &[u8]) -> Result<Self, TilemarkError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8_der, &rng)
            .map_err(|e| TilemarkError::Signing(format!("key parsing failed: {e}")))?;

        Ok(Self {
            pkcs8_der: pkcs8_der.to_vec(),
            public_key_der: key_pair.public_key().as_ref().to_vec(),
        })
    }

    /// The PKCS#8 v1 DER-encoded private key.
    pub fn private_key_pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }
}

impl Signer for SigningKey {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, TilemarkError> {
        let rng = SystemRandom::new();

        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.pkcs8_der, &rng)
                .map_err(|e| TilemarkError::Signing(format!("key load failed: {e}")))?;

        let sig = key_pair
            .sign(&rng, message)
            .map_err(|e| TilemarkError::Signing(format!("signing failed: {e}")))?;

        Ok(sig.as_ref().to_vec())
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key_der
    }
}

/// Check a DER signature against an uncompressed P-256 public key.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), TilemarkError> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(message, signature)
        .map_err(|_| TilemarkError::Signing("signature does not verify".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair() {
        let key = SigningKey::generate().expect("key generation failed");
        assert!(key.private_key_pkcs8_der().len() > 100);
        assert_eq!(key.public_key().len(), 65);
        assert_eq!(key.public_key()[0], 0x04, "must be uncompressed point");
    }

    #[test]
    fn sign_and_verify() {
        let key = SigningKey::generate().expect("key generation failed");
        let message = b"tilemark stamp";
        let signature = key.sign(message).expect("signing failed");
        verify_signature(key.public_key(), message, &signature).expect("verification failed");
        assert!(verify_signature(key.public_key(), b"other", &signature).is_err());
    }

    #[test]
    fn pkcs8_reload_keeps_public_key() {
        let key = SigningKey::generate().unwrap();
        let reloaded = SigningKey::from_pkcs8(key.private_key_pkcs8_der()).unwrap();
        assert_eq!(key.public_key(), reloaded.public_key());
    }
}
