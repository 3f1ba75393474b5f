//! Persisted form of a jig lock.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::pointer::Pointer;

/// Lock type code as stored in an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LockKind {
    None = 0,
    Address = 1,
    Jig = 2,
    Public = 3,
    Frozen = 4,
}

impl LockKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(LockKind::None),
            1 => Ok(LockKind::Address),
            2 => Ok(LockKind::Jig),
            3 => Ok(LockKind::Public),
            4 => Ok(LockKind::Frozen),
            other => Err(anyhow!("unknown lock type {}", other)),
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockKind::None => "none",
            LockKind::Address => "address",
            LockKind::Jig => "jig",
            LockKind::Public => "public",
            LockKind::Frozen => "frozen",
        };
        write!(f, "{}", name)
    }
}

/// `{origin, type, data}` triple written into every output.
///
/// `origin` repeats the owning jig's origin so a lock record can be checked
/// on its own. `kind` is kept as the raw code: decoding an unknown code is the
/// engine's decision, not the codec's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedLock {
    pub origin: Pointer,
    pub kind: u32,
    pub data: Vec<u8>,
}

impl SerializedLock {
    pub fn new(origin: Pointer, kind: LockKind, data: Vec<u8>) -> Self {
        Self {
            origin,
            kind: kind.code(),
            data,
        }
    }

    pub fn lock_kind(&self) -> Result<LockKind> {
        LockKind::from_code(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_kind_codes() {
        for kind in [
            LockKind::None,
            LockKind::Address,
            LockKind::Jig,
            LockKind::Public,
            LockKind::Frozen,
        ] {
            assert_eq!(LockKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(LockKind::from_code(99).is_err());
    }

    #[test]
    fn test_serialized_lock_layout() {
        let lock = SerializedLock::new(Pointer::new([1; 32], 0), LockKind::Address, vec![9; 20]);
        let bytes = bcs::to_bytes(&lock).unwrap();
        // origin(36) + kind(4) + uleb len(1) + data(20)
        assert_eq!(bytes.len(), 36 + 4 + 1 + 20);
        assert_eq!(&bytes[36..40], &1u32.to_le_bytes());
        assert_eq!(bytes[40], 20);
    }
}
