//! 32-byte Blake2b-256 hash type with zero-allocation operations.

use crate::types::encoding::EncodeSink;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chainvm_derive::BinaryCodec;
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used throughout the chain.
///
/// Transaction ids, contract ids, code hashes, and public-key hashes are all
/// this type. It is `Copy` for performance - hashes are passed constantly
/// during execution and should live on the stack rather than behind an
/// allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

/// 32-byte identifier of a deployed stateful contract.
pub type ContractId = Hash;

/// 32-byte token identifier; equals the contract id of the issuing contract.
pub type TokenId = Hash;

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Creates a new Blake2b-256 hash builder for incremental hashing.
    ///
    /// Use this for streaming data or when computing hashes over multiple
    /// inputs without intermediate allocations.
    pub fn blake2b() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes a single byte slice in one shot.
    pub fn hash_bytes(data: &[u8]) -> Hash {
        Hash::blake2b().chain(data).finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental Blake2b-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder {
    hasher: Blake2b256,
}

impl HashBuilder {
    /// Creates a new hash builder with empty state.
    pub fn new() -> Self {
        Self {
            hasher: Blake2b256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}
