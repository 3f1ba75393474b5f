//! Output records: the persisted state of one jig.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::base64_encode;
use crate::lock::SerializedLock;
use crate::pointer::Pointer;

/// Serialized jig.
///
/// Binary layout (bcs, little-endian, ULEB128 lengths):
///
/// ```text
/// origin(36) | location(36) | class_ptr(36) | lock.origin(36) | lock.kind(u32)
///   | lock.data(len-prefixed) | state(len-prefixed)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Permanent identity of the jig.
    pub origin: Pointer,
    /// Current placement; changes every time the jig is re-emitted.
    pub location: Pointer,
    /// Package id + export index of the jig's class.
    pub class_ptr: Pointer,
    pub lock: SerializedLock,
    /// ABI-encoded field values.
    pub state: Vec<u8>,
}

impl Output {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).context("encode output")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bcs::from_bytes(bytes).context("decode output")
    }

    /// sha256 of the encoded record.
    pub fn hash(&self) -> Result<[u8; 32]> {
        let bytes = self.to_bytes()?;
        Ok(Sha256::digest(&bytes).into())
    }

    /// Human-readable view for logs and debugging tools.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "origin": self.origin.to_string(),
            "location": self.location.to_string(),
            "classPtr": self.class_ptr.to_string(),
            "lock": {
                "kind": self.lock.kind,
                "data": hex::encode(&self.lock.data),
            },
            "state": base64_encode(&self.state),
        })
    }
}
