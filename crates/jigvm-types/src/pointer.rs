//! Content identifiers: pointers, addresses and package ids.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::{parse_hex32, parse_hex_array};

/// Size of an encoded [`Pointer`] in bytes.
pub const POINTER_SIZE: usize = 36;

/// Size of an [`Address`] in bytes.
pub const ADDRESS_SIZE: usize = 20;

// =============================================================================
// Pointer
// =============================================================================

/// A transaction hash plus an index.
///
/// Pointers name jig origins, jig locations and class definitions
/// (package id + export index). They serialize as 32 raw bytes followed by a
/// little-endian u32, 36 bytes in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pointer {
    pub id: [u8; 32],
    pub idx: u32,
}

impl Pointer {
    pub fn new(id: [u8; 32], idx: u32) -> Self {
        Self { id, idx }
    }

    /// Pointer to the `export_idx`-th export of a package.
    pub fn class(pkg: &PackageId, export_idx: u32) -> Self {
        Self::new(pkg.0, export_idx)
    }

    pub fn to_bytes(&self) -> [u8; POINTER_SIZE] {
        let mut out = [0u8; POINTER_SIZE];
        out[..32].copy_from_slice(&self.id);
        out[32..].copy_from_slice(&self.idx.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != POINTER_SIZE {
            return Err(anyhow!(
                "pointer must be {} bytes, got {}",
                POINTER_SIZE,
                bytes.len()
            ));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes[..32]);
        let mut idx = [0u8; 4];
        idx.copy_from_slice(&bytes[32..]);
        Ok(Self::new(id, u32::from_le_bytes(idx)))
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", hex::encode(self.id), self.idx)
    }
}

impl FromStr for Pointer {
    type Err = anyhow::Error;

    /// Parse the `<hex>_<idx>` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let (id, idx) = s
            .rsplit_once('_')
            .ok_or_else(|| anyhow!("Invalid pointer '{}': expected <hex>_<idx>", s))?;
        let idx = idx
            .parse::<u32>()
            .map_err(|e| anyhow!("Invalid pointer index '{}': {}", idx, e))?;
        Ok(Self::new(parse_hex32(id, "pointer")?, idx))
    }
}

// =============================================================================
// Address
// =============================================================================

/// Public-key hash used by address locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// First 20 bytes of sha256(pubkey).
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        let digest = Sha256::digest(pubkey);
        let mut out = [0u8; ADDRESS_SIZE];
        out.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| {
            anyhow!(
                "address must be {} bytes, got {}",
                ADDRESS_SIZE,
                bytes.len()
            )
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(parse_hex_array::<ADDRESS_SIZE>(s, "address")?))
    }
}

// =============================================================================
// PackageId
// =============================================================================

/// Content hash identifying a deployed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(pub [u8; 32]);

impl PackageId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PackageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(parse_hex32(s, "package id")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_is_36_bytes_in_bcs() {
        let ptr = Pointer::new([7u8; 32], 0x0102_0304);
        let encoded = bcs::to_bytes(&ptr).unwrap();
        assert_eq!(encoded.len(), POINTER_SIZE);
        assert_eq!(&encoded[..], &ptr.to_bytes()[..]);
        assert_eq!(&encoded[32..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_pointer_display_parse() {
        let ptr = Pointer::new([0xab; 32], 12);
        let text = ptr.to_string();
        assert!(text.ends_with("_12"));
        assert_eq!(text.parse::<Pointer>().unwrap(), ptr);
        assert!("nounderscore".parse::<Pointer>().is_err());
    }

    #[test]
    fn test_pointer_from_bytes_rejects_bad_length() {
        assert!(Pointer::from_bytes(&[0u8; 35]).is_err());
        let ptr = Pointer::new([1u8; 32], 3);
        assert_eq!(Pointer::from_bytes(&ptr.to_bytes()).unwrap(), ptr);
    }

    #[test]
    fn test_address_from_pubkey_is_stable() {
        let a = Address::from_pubkey(b"pubkey-one");
        let b = Address::from_pubkey(b"pubkey-one");
        let c = Address::from_pubkey(b"pubkey-two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string().parse::<Address>().unwrap(), a);
    }

    #[test]
    fn test_package_id_hex() {
        let id = PackageId([0x5a; 32]);
        assert_eq!(id.short(), "5a5a5a5a");
        assert_eq!(id.to_string().parse::<PackageId>().unwrap(), id);
    }
}
