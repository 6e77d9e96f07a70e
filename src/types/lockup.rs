//! Lockup script taxonomy and address forms.
//!
//! A lockup script is the spending predicate attached to an output. The
//! first three forms guard asset outputs; [`LockupScript::P2C`] marks an
//! output owned by a deployed contract and is not spendable by a key.
//!
//! # Wire Form
//!
//! One-byte tag followed by the payload:
//!
//! - `0 || pk_hash[32]`
//! - `1 || varint(n) || pk_hash[32]*n || varint(m)` with `0 < m < n`
//! - `2 || script_hash[32]`
//! - `3 || contract_id[32]`
//!
//! The human-readable address is the base58 encoding of these bytes.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::{ContractId, Hash};
use chainvm_derive::Error;
use std::fmt;
use std::str::FromStr;

/// Number of shard groups addresses are partitioned into.
pub const GROUP_NUM: u32 = 4;

/// Spending predicate and address form of an output.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockupScript {
    /// Pay to the hash of a single public key.
    P2pkh(Hash),
    /// Pay to m-of-n public key hashes.
    P2mpkh(P2mpkh),
    /// Pay to a script hash.
    P2sh(Hash),
    /// Owned by a deployed contract; never a valid asset lockup.
    P2c(ContractId),
}

/// m-of-n multisig lockup with the invariant `0 < m < n`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct P2mpkh {
    pk_hashes: Vec<Hash>,
    m: u32,
}

impl P2mpkh {
    /// Builds an m-of-n lockup; `None` unless `0 < m < n`.
    pub fn new(pk_hashes: Vec<Hash>, m: u32) -> Option<P2mpkh> {
        if m == 0 || m as usize >= pk_hashes.len() {
            return None;
        }
        Some(P2mpkh { pk_hashes, m })
    }

    pub fn pk_hashes(&self) -> &[Hash] {
        &self.pk_hashes
    }

    pub fn m(&self) -> u32 {
        self.m
    }
}

impl LockupScript {
    const TAG_P2PKH: u8 = 0;
    const TAG_P2MPKH: u8 = 1;
    const TAG_P2SH: u8 = 2;
    const TAG_P2C: u8 = 3;

    /// Lockup for the output balance of a deployed contract.
    pub fn p2c(contract_id: ContractId) -> LockupScript {
        LockupScript::P2c(contract_id)
    }

    /// True for lockups that may guard asset outputs (everything but P2C).
    pub fn is_asset_type(&self) -> bool {
        !matches!(self, LockupScript::P2c(_))
    }

    /// Group-assignment hint derived from the serialized form.
    ///
    /// The low bit is always set, so a hint is never zero.
    pub fn script_hint(&self) -> u32 {
        let hash = Hash::hash_bytes(self.to_bytes().as_slice());
        u32::from_be_bytes([hash.0[0], hash.0[1], hash.0[2], hash.0[3]]) | 1
    }

    /// Shard group this lockup belongs to.
    pub fn group_index(&self) -> u32 {
        self.script_hint() % GROUP_NUM
    }
}

impl Encode for LockupScript {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            LockupScript::P2pkh(pk_hash) => {
                Self::TAG_P2PKH.encode(out);
                pk_hash.encode(out);
            }
            LockupScript::P2mpkh(multisig) => {
                Self::TAG_P2MPKH.encode(out);
                multisig.pk_hashes.encode(out);
                multisig.m.encode(out);
            }
            LockupScript::P2sh(script_hash) => {
                Self::TAG_P2SH.encode(out);
                script_hash.encode(out);
            }
            LockupScript::P2c(contract_id) => {
                Self::TAG_P2C.encode(out);
                contract_id.encode(out);
            }
        }
    }
}

impl Decode for LockupScript {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = u8::decode(input)?;
        match tag {
            Self::TAG_P2PKH => Ok(LockupScript::P2pkh(Hash::decode(input)?)),
            Self::TAG_P2MPKH => {
                let pk_hashes = Vec::<Hash>::decode(input)?;
                let m = u32::decode(input)?;
                let multisig = P2mpkh::new(pk_hashes, m).ok_or(DecodeError::InvalidValue)?;
                Ok(LockupScript::P2mpkh(multisig))
            }
            Self::TAG_P2SH => Ok(LockupScript::P2sh(Hash::decode(input)?)),
            Self::TAG_P2C => Ok(LockupScript::P2c(ContractId::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl fmt::Display for LockupScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.to_bytes().as_slice()).into_string())
    }
}

/// Errors parsing a human-readable address.
#[derive(Debug, Error)]
pub enum AddressParseError {
    #[error("address is not valid base58")]
    InvalidBase58,
    #[error("address bytes are not a valid lockup script")]
    InvalidLockupScript,
}

impl FromStr for LockupScript {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressParseError::InvalidBase58)?;
        LockupScript::from_bytes(&bytes).map_err(|_| AddressParseError::InvalidLockupScript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> Hash {
        Hash::hash_bytes(&[seed])
    }

    #[test]
    fn tags_are_fixed() {
        assert_eq!(LockupScript::P2pkh(h(1)).to_bytes()[0], 0);
        let multisig = P2mpkh::new(vec![h(1), h(2)], 1).unwrap();
        assert_eq!(LockupScript::P2mpkh(multisig).to_bytes()[0], 1);
        assert_eq!(LockupScript::P2sh(h(1)).to_bytes()[0], 2);
        assert_eq!(LockupScript::P2c(h(1)).to_bytes()[0], 3);
    }

    #[test]
    fn p2pkh_wire_form() {
        let lockup = LockupScript::P2pkh(h(7));
        let bytes = lockup.to_bytes();
        assert_eq!(bytes.len(), 33);
        assert_eq!(&bytes[1..], h(7).as_slice());
        assert_eq!(LockupScript::from_bytes(&bytes).unwrap(), lockup);
    }

    #[test]
    fn p2mpkh_roundtrip() {
        let lockup = LockupScript::P2mpkh(P2mpkh::new(vec![h(1), h(2), h(3)], 2).unwrap());
        let bytes = lockup.to_bytes();
        assert_eq!(LockupScript::from_bytes(&bytes).unwrap(), lockup);
    }

    #[test]
    fn p2mpkh_enforces_threshold_invariant() {
        assert!(P2mpkh::new(vec![h(1), h(2)], 0).is_none());
        assert!(P2mpkh::new(vec![h(1), h(2)], 2).is_none());
        assert!(P2mpkh::new(vec![h(1), h(2)], 3).is_none());
        assert!(P2mpkh::new(vec![h(1), h(2)], 1).is_some());
    }

    #[test]
    fn p2mpkh_decode_rejects_bad_threshold() {
        // n = 2, m = 2 violates m < n
        let mut bytes = vec![1u8, 2];
        bytes.extend_from_slice(h(1).as_slice());
        bytes.extend_from_slice(h(2).as_slice());
        bytes.push(2);
        assert!(LockupScript::from_bytes(&bytes).is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(h(1).as_slice());
        assert!(LockupScript::from_bytes(&bytes).is_err());
    }

    #[test]
    fn asset_type_excludes_contracts() {
        assert!(LockupScript::P2pkh(h(1)).is_asset_type());
        assert!(LockupScript::P2sh(h(1)).is_asset_type());
        assert!(!LockupScript::P2c(h(1)).is_asset_type());
    }

    #[test]
    fn script_hint_is_nonzero_and_stable() {
        let lockup = LockupScript::P2pkh(h(1));
        let hint = lockup.script_hint();
        assert_ne!(hint, 0);
        assert_eq!(hint & 1, 1);
        assert_eq!(lockup.script_hint(), hint);
        assert!(lockup.group_index() < GROUP_NUM);
    }

    #[test]
    fn address_roundtrip_via_base58() {
        let lockup = LockupScript::P2pkh(h(9));
        let address = lockup.to_string();
        let parsed: LockupScript = address.parse().unwrap();
        assert_eq!(parsed, lockup);
    }

    #[test]
    fn address_parse_failures() {
        assert!(matches!(
            "not-base58-0OIl".parse::<LockupScript>(),
            Err(AddressParseError::InvalidBase58)
        ));
        let garbage = bs58::encode(&[9u8, 1, 2]).into_string();
        assert!(matches!(
            garbage.parse::<LockupScript>(),
            Err(AddressParseError::InvalidLockupScript)
        ));
    }
}
