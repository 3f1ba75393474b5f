//! Signature verification used by SIGN and SIGNTO.

use anyhow::{anyhow, Result};
use fastcrypto::ed25519::{Ed25519PublicKey, Ed25519Signature};
use fastcrypto::traits::{ToFromBytes, VerifyingKey};
use jigvm_types::Address;

/// Checks signatures and derives addresses from public keys.
pub trait SignatureVerifier: Send + Sync {
    /// Whether `signature` over `message` is valid for `pubkey`.
    /// Malformed keys or signatures verify as false.
    fn verify(&self, signature: &[u8], message: &[u8], pubkey: &[u8]) -> bool;

    fn address_from_pubkey(&self, pubkey: &[u8]) -> Result<Address>;
}

/// Ed25519 signatures; addresses are the first 20 bytes of sha256(pubkey).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signature: &[u8], message: &[u8], pubkey: &[u8]) -> bool {
        let Ok(signature) = <Ed25519Signature as ToFromBytes>::from_bytes(signature) else {
            return false;
        };
        let Ok(public_key) = <Ed25519PublicKey as ToFromBytes>::from_bytes(pubkey) else {
            return false;
        };
        public_key.verify(message, &signature).is_ok()
    }

    fn address_from_pubkey(&self, pubkey: &[u8]) -> Result<Address> {
        <Ed25519PublicKey as ToFromBytes>::from_bytes(pubkey)
            .map_err(|e| anyhow!("invalid ed25519 public key: {}", e))?;
        Ok(Address::from_pubkey(pubkey))
    }
}
