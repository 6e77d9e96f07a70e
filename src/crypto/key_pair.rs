//! ECDSA signature key pairs on secp256k1.
//!
//! Transactions are authorized by ECDSA signatures over the 32-byte
//! transaction id. Public keys travel on the wire in 33-byte SEC1
//! compressed form; P2PKH lockups commit to the Blake2b-256 hash of those
//! bytes.

use crate::types::encoding::{read_bytes, Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand_core::OsRng;

/// Length of a SEC1 compressed public key.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of a raw (r || s) ECDSA signature.
pub const SIGNATURE_LEN: usize = 64;

/// Private key for signing transactions.
///
/// Generated using cryptographically secure randomness from the OS.
/// Never serialized or transmitted.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Returns `None` if the bytes do not represent a valid scalar for
    /// secp256k1.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SigningKey::from_slice(bytes).ok().map(|key| Self { key })
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: *self.key.verifying_key(),
        }
    }

    /// Signs a 32-byte digest (a transaction id), producing an ECDSA
    /// signature.
    pub fn sign(&self, digest: &Hash) -> Signature {
        // Signing a fixed-width digest cannot fail for a valid key.
        let sig: k256::ecdsa::Signature = self
            .key
            .sign_prehash(digest.as_slice())
            .expect("signing a 32-byte digest");
        Signature(sig)
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Public key for signature verification, SEC1 compressed on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parses a 33-byte SEC1 compressed public key.
    ///
    /// Returns `None` for anything that is not a valid curve point.
    pub fn from_bytes(bytes: &[u8]) -> Option<PublicKey> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return None;
        }
        VerifyingKey::from_sec1_bytes(bytes)
            .ok()
            .map(|key| PublicKey { key })
    }

    /// Returns the 33-byte SEC1 compressed form.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.key.to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(point.as_bytes());
        bytes
    }

    /// Blake2b-256 hash of the compressed key, committed to by P2PKH
    /// lockups.
    pub fn pk_hash(&self) -> Hash {
        Hash::hash_bytes(&self.to_bytes())
    }

    /// Verifies an ECDSA signature over a 32-byte digest.
    pub fn verify(&self, digest: &Hash, signature: &Signature) -> bool {
        self.key.verify_prehash(digest.as_slice(), &signature.0).is_ok()
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, PUBLIC_KEY_LEN)?;
        PublicKey::from_bytes(bytes).ok_or(DecodeError::InvalidValue)
    }
}

/// Raw (r || s) ECDSA signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(k256::ecdsa::Signature);

impl Signature {
    /// Parses a 64-byte raw signature.
    pub fn from_bytes(bytes: &[u8]) -> Option<Signature> {
        k256::ecdsa::Signature::from_slice(bytes).ok().map(Signature)
    }

    /// Returns the 64-byte raw form.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(&self.0.to_bytes());
        bytes
    }
}

impl Encode for Signature {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for Signature {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, SIGNATURE_LEN)?;
        Signature::from_bytes(bytes).ok_or(DecodeError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_success() {
        let private = PrivateKey::new();
        let public = private.public_key();

        let digest = Hash::hash_bytes(b"tx id");
        let signature = private.sign(&digest);
        assert!(public.verify(&digest, &signature));
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let private = PrivateKey::new();
        let other = PrivateKey::new().public_key();

        let digest = Hash::hash_bytes(b"tx id");
        let signature = private.sign(&digest);
        assert!(!other.verify(&digest, &signature));
    }

    #[test]
    fn verify_fails_with_wrong_digest() {
        let private = PrivateKey::new();
        let public = private.public_key();

        let signature = private.sign(&Hash::hash_bytes(b"tx id"));
        assert!(!public.verify(&Hash::hash_bytes(b"other tx"), &signature));
    }

    #[test]
    fn public_key_compressed_roundtrip() {
        let public = PrivateKey::new().public_key();
        let bytes = public.to_bytes();
        assert!(bytes[0] == 0x02 || bytes[0] == 0x03);
        assert_eq!(PublicKey::from_bytes(&bytes), Some(public));
    }

    #[test]
    fn public_key_rejects_garbage() {
        assert!(PublicKey::from_bytes(&[0u8; PUBLIC_KEY_LEN]).is_none());
        assert!(PublicKey::from_bytes(&[2u8; 32]).is_none());
    }

    #[test]
    fn signature_roundtrip() {
        let signature = PrivateKey::new().sign(&Hash::hash_bytes(b"data"));
        let bytes = signature.to_bytes();
        assert_eq!(Signature::from_bytes(&bytes), Some(signature));
    }

    #[test]
    fn from_bytes_produces_deterministic_key() {
        let bytes: [u8; 32] = [7u8; 32];
        let key1 = PrivateKey::from_bytes(&bytes).unwrap();
        let key2 = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(key1.public_key(), key2.public_key());
    }

    #[test]
    fn from_bytes_with_zero_key_fails() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn pk_hash_is_stable() {
        let public = PrivateKey::new().public_key();
        assert_eq!(public.pk_hash(), Hash::hash_bytes(&public.to_bytes()));
    }
}
