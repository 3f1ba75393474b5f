//! Transaction model: instructions, arguments and signing hashes.
//!
//! A transaction is an ordered list of [`Instruction`]s. Every instruction
//! produces exactly one statement, and later instructions refer to earlier
//! statements by index:
//!
//! ```
//! use jigvm_core::tx::{Arg, Instruction, Transaction};
//! use jigvm_types::PackageId;
//!
//! let tx = Transaction::new(vec![
//!     Instruction::Import { pkg_id: PackageId([7; 32]) },
//!     Instruction::New { pkg_idx: 0, class_idx: 0, args: vec![Arg::Value(vec![1])] },
//! ]);
//! assert_eq!(tx.instructions[1].opcode().byte(), 0xB1);
//! ```
//!
//! The bcs encoding of [`Transaction`] is the wire format; its sha256 is the
//! transaction hash from which origins and locations are derived.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use jigvm_types::{Address, PackageId, Pointer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opcode byte of each instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Import = 0xA1,
    Load = 0xA2,
    LoadByOrigin = 0xA3,
    New = 0xB1,
    Exec = 0xB2,
    ExecFunc = 0xB4,
    Fund = 0xC1,
    Lock = 0xC2,
    Deploy = 0xD1,
    Sign = 0xE1,
    SignTo = 0xE2,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Import => "IMPORT",
            Opcode::Load => "LOAD",
            Opcode::LoadByOrigin => "LOADBYORIGIN",
            Opcode::New => "NEW",
            Opcode::Exec => "EXEC",
            Opcode::ExecFunc => "EXECFUNC",
            Opcode::Fund => "FUND",
            Opcode::Lock => "LOCK",
            Opcode::Deploy => "DEPLOY",
            Opcode::Sign => "SIGN",
            Opcode::SignTo => "SIGNTO",
        }
    }

    /// Instructions that change state and therefore need a funded transaction.
    pub fn requires_funding(self) -> bool {
        matches!(
            self,
            Opcode::New | Opcode::Exec | Opcode::ExecFunc | Opcode::Lock | Opcode::Deploy
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Argument to a constructor, method or function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    /// bcs encoding of a value of the parameter's type. Cannot hold jigs.
    Value(Vec<u8>),
    /// Result of an earlier instruction.
    Ref(u16),
}

/// Target lock of a LOCK instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockSpec {
    Address(Address),
    Public,
    Frozen,
    /// Not accepted at the transaction level.
    Jig(Pointer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Resolve a package and append its handle.
    Import { pkg_id: PackageId },

    /// Load a jig by the location of its current output.
    Load { location: Pointer },

    /// Load a jig by origin.
    LoadByOrigin { origin: Pointer },

    /// Construct a jig. `class_idx` is an export index of the package.
    New {
        pkg_idx: u16,
        class_idx: u16,
        args: Vec<Arg>,
    },

    /// Call a method. `method_idx` indexes the class's flattened method table.
    Exec {
        jig_idx: u16,
        method_idx: u16,
        args: Vec<Arg>,
    },

    /// Call a free function. `fn_idx` is an export index of the package.
    ExecFunc {
        pkg_idx: u16,
        fn_idx: u16,
        args: Vec<Arg>,
    },

    /// Spend a coin to pay for the transaction.
    Fund { coin_idx: u16 },

    Lock { jig_idx: u16, lock: LockSpec },

    /// Compile and stage a new package.
    Deploy {
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
    },

    /// Signature over the whole transaction.
    Sign { sig: Vec<u8>, pubkey: Vec<u8> },

    /// Signature over the instructions before this one.
    SignTo { sig: Vec<u8>, pubkey: Vec<u8> },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Import { .. } => Opcode::Import,
            Instruction::Load { .. } => Opcode::Load,
            Instruction::LoadByOrigin { .. } => Opcode::LoadByOrigin,
            Instruction::New { .. } => Opcode::New,
            Instruction::Exec { .. } => Opcode::Exec,
            Instruction::ExecFunc { .. } => Opcode::ExecFunc,
            Instruction::Fund { .. } => Opcode::Fund,
            Instruction::Lock { .. } => Opcode::Lock,
            Instruction::Deploy { .. } => Opcode::Deploy,
            Instruction::Sign { .. } => Opcode::Sign,
            Instruction::SignTo { .. } => Opcode::SignTo,
        }
    }

    /// Copy with any signature bytes removed.
    fn blanked(&self) -> Instruction {
        match self {
            Instruction::Sign { pubkey, .. } => Instruction::Sign {
                sig: Vec::new(),
                pubkey: pubkey.clone(),
            },
            Instruction::SignTo { pubkey, .. } => Instruction::SignTo {
                sig: Vec::new(),
                pubkey: pubkey.clone(),
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub instructions: Vec<Instruction>,
}

impl Transaction {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).context("encode transaction")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bcs::from_bytes(bytes).context("decode transaction")
    }

    /// sha256 of the encoded transaction.
    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(Sha256::digest(self.to_bytes()?).into())
    }

    /// Message signed by SIGN (`upto = len`) and SIGNTO (`upto = own index`).
    ///
    /// Signatures are blanked so signers do not depend on each other.
    pub fn sighash(&self, upto: usize) -> Result<[u8; 32]> {
        let upto = upto.min(self.instructions.len());
        let blanked: Vec<Instruction> = self.instructions[..upto]
            .iter()
            .map(Instruction::blanked)
            .collect();
        let bytes = bcs::to_bytes(&blanked).context("encode signing payload")?;
        Ok(Sha256::digest(bytes).into())
    }
}
