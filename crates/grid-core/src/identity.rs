//! Signing identity.
//!
//! One identity signs every deployment and chain call in a run. It is
//! derived from a BIP-39 mnemonic (first 32 bytes of the BIP-39 seed) or
//! from a raw 32-byte hex seed, for either key type.

use std::fmt;

use bip39::{Language, Mnemonic};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, PublicKey};

use crate::config::KeyType;
use crate::error::{CoreError, CoreResult};
use crate::validation::decode_hex_seed;

/// Signing context used for sr25519 signatures.
const SR25519_CONTEXT: &[u8] = b"substrate";

enum Inner {
    Ed25519(SigningKey),
    Sr25519(Keypair),
}

/// Key pair of the twin acting in this run.
pub struct Identity {
    inner: Inner,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("key_type", &self.key_type())
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl Identity {
    /// Derive an identity from a mnemonic or hex seed.
    pub fn from_mnemonic_or_seed(mnemonic_or_seed: &str, key_type: KeyType) -> CoreResult<Self> {
        let seed = seed_bytes(mnemonic_or_seed)?;
        Self::from_seed(seed, key_type)
    }

    /// Build an identity directly from 32 seed bytes.
    pub fn from_seed(seed: [u8; 32], key_type: KeyType) -> CoreResult<Self> {
        let inner = match key_type {
            KeyType::Ed25519 => Inner::Ed25519(SigningKey::from_bytes(&seed)),
            KeyType::Sr25519 => {
                let mini = MiniSecretKey::from_bytes(&seed)
                    .map_err(|e| CoreError::InvalidMnemonic(e.to_string()))?;
                Inner::Sr25519(mini.expand_to_keypair(ExpansionMode::Ed25519))
            }
        };
        Ok(Self { inner })
    }

    pub fn key_type(&self) -> KeyType {
        match self.inner {
            Inner::Ed25519(_) => KeyType::Ed25519,
            Inner::Sr25519(_) => KeyType::Sr25519,
        }
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        match &self.inner {
            Inner::Ed25519(key) => key.verifying_key().to_bytes(),
            Inner::Sr25519(pair) => pair.public.to_bytes(),
        }
    }

    /// Sign `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.inner {
            Inner::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
            Inner::Sr25519(pair) => pair
                .sign_simple(SR25519_CONTEXT, message)
                .to_bytes()
                .to_vec(),
        }
    }

    /// Check a signature produced by a key of `key_type`.
    pub fn verify(
        key_type: KeyType,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> CoreResult<()> {
        let bad = |e: String| CoreError::Signing(e);
        match key_type {
            KeyType::Ed25519 => {
                let pk: [u8; 32] = public_key
                    .try_into()
                    .map_err(|_| bad("public key must be 32 bytes".to_string()))?;
                let vk = VerifyingKey::from_bytes(&pk).map_err(|e| bad(e.to_string()))?;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| bad(e.to_string()))?;
                vk.verify(message, &sig).map_err(|e| bad(e.to_string()))
            }
            KeyType::Sr25519 => {
                let pk = PublicKey::from_bytes(public_key).map_err(|e| bad(e.to_string()))?;
                let sig = schnorrkel::Signature::from_bytes(signature)
                    .map_err(|e| bad(e.to_string()))?;
                pk.verify_simple(SR25519_CONTEXT, message, &sig)
                    .map_err(|e| bad(e.to_string()))
            }
        }
    }
}

fn seed_bytes(mnemonic_or_seed: &str) -> CoreResult<[u8; 32]> {
    if let Ok(mnemonic) = Mnemonic::parse_in_normalized(Language::English, mnemonic_or_seed) {
        let full = mnemonic.to_seed_normalized("");
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&full[..32]);
        return Ok(seed);
    }
    decode_hex_seed(mnemonic_or_seed).ok_or_else(|| {
        CoreError::InvalidMnemonic(format!(
            "mnemonic/seed '{}...' is invalid",
            mnemonic_or_seed.chars().take(8).collect::<String>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_sign_and_verify_both_key_types() {
        for key_type in [KeyType::Ed25519, KeyType::Sr25519] {
            let id = Identity::from_mnemonic_or_seed(MNEMONIC, key_type).unwrap();
            assert_eq!(id.key_type(), key_type);

            let sig = id.sign(b"challenge");
            assert_eq!(sig.len(), 64);
            Identity::verify(key_type, &id.public_key(), b"challenge", &sig).unwrap();
            assert!(Identity::verify(key_type, &id.public_key(), b"other", &sig).is_err());
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = Identity::from_mnemonic_or_seed(MNEMONIC, KeyType::Ed25519).unwrap();
        let b = Identity::from_mnemonic_or_seed(MNEMONIC, KeyType::Ed25519).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let seed = format!("0x{}", "07".repeat(32));
        let c = Identity::from_mnemonic_or_seed(&seed, KeyType::Sr25519).unwrap();
        let d = Identity::from_seed([7u8; 32], KeyType::Sr25519).unwrap();
        assert_eq!(c.public_key(), d.public_key());
    }

    #[test]
    fn test_invalid_seed() {
        assert!(Identity::from_mnemonic_or_seed("not a seed", KeyType::Ed25519).is_err());
    }
}
