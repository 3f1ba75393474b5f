//! Lock state machine guarding every jig.
//!
//! A lock answers three questions for the current execution context:
//!
//! - [`Lock::assert_open`]: may the caller act as the owner (fund, spend)?
//! - [`Lock::can_receive_calls`]: may the caller invoke a method?
//! - [`Lock::can_be_changed`]: may the caller replace the lock itself?
//!
//! | Lock        | assert_open  | can_receive_calls | can_be_changed     |
//! |-------------|--------------|-------------------|--------------------|
//! | None        | deny         | deny              | deny               |
//! | Open        | allow        | allow             | allow              |
//! | Address(a)  | signed by a  | signed by a       | signed by a        |
//! | Jig(o)      | caller == o  | caller == o       | caller == o        |
//! | Public      | deny         | allow             | caller is the jig  |
//! | Frozen      | deny         | deny              | deny               |
//!
//! `Open` exists only inside a transaction: a freshly constructed jig starts
//! open and must be locked before the transaction finishes.

use std::fmt;

use jigvm_types::{Address, LockKind, Pointer, SerializedLock, ADDRESS_SIZE, POINTER_SIZE};

use crate::errors::ExecError;

/// Identity on whose behalf code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerId {
    /// Top-level instruction, no jig on the stack.
    Transaction,
    /// Code running inside a method or constructor of this jig.
    Jig(Pointer),
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerId::Transaction => write!(f, "transaction"),
            CallerId::Jig(origin) => write!(f, "jig {}", origin),
        }
    }
}

/// What a lock needs to know about the running transaction.
pub trait AuthContext {
    fn caller(&self) -> CallerId;

    /// Whether the transaction carries a valid signature from `address`
    /// covering the instruction currently executing.
    fn is_signed_by(&self, address: &Address) -> bool;
}

/// Runtime lock of a jig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    None,
    Open,
    Address(Address),
    Jig(Pointer),
    Public,
    Frozen,
}

impl Lock {
    /// Fails with a permission error unless the caller may act as owner.
    pub fn assert_open(&self, ctx: &dyn AuthContext) -> Result<(), ExecError> {
        let allowed = match self {
            Lock::Open => true,
            Lock::Address(addr) => ctx.is_signed_by(addr),
            Lock::Jig(parent) => ctx.caller() == CallerId::Jig(*parent),
            Lock::None | Lock::Public | Lock::Frozen => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(ExecError::permission(format!("{} lock is not open", self.kind_name()))
                .with_caller(ctx.caller()))
        }
    }

    pub fn can_receive_calls(&self, ctx: &dyn AuthContext) -> bool {
        match self {
            Lock::Open | Lock::Public => true,
            Lock::Address(addr) => ctx.is_signed_by(addr),
            Lock::Jig(parent) => ctx.caller() == CallerId::Jig(*parent),
            Lock::None | Lock::Frozen => false,
        }
    }

    /// `owner` is the origin of the jig holding this lock; a public jig may
    /// only re-lock itself.
    pub fn can_be_changed(&self, ctx: &dyn AuthContext, owner: &Pointer) -> bool {
        match self {
            Lock::Open => true,
            Lock::Address(addr) => ctx.is_signed_by(addr),
            Lock::Jig(parent) => ctx.caller() == CallerId::Jig(*parent),
            Lock::Public => ctx.caller() == CallerId::Jig(*owner),
            Lock::None | Lock::Frozen => false,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Lock::Frozen)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Lock::Open)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Lock::None => "none",
            Lock::Open => "open",
            Lock::Address(_) => "address",
            Lock::Jig(_) => "jig",
            Lock::Public => "public",
            Lock::Frozen => "frozen",
        }
    }

    /// Persisted form. An open lock has no persisted form.
    pub fn to_record(&self, origin: Pointer) -> Result<SerializedLock, ExecError> {
        let (kind, data) = match self {
            Lock::None => (LockKind::None, Vec::new()),
            Lock::Address(addr) => (LockKind::Address, addr.as_bytes().to_vec()),
            Lock::Jig(parent) => (LockKind::Jig, parent.to_bytes().to_vec()),
            Lock::Public => (LockKind::Public, Vec::new()),
            Lock::Frozen => (LockKind::Frozen, Vec::new()),
            Lock::Open => {
                return Err(ExecError::permission("jig left without a lock").with_origin(origin))
            }
        };
        Ok(SerializedLock::new(origin, kind, data))
    }

    /// Rebuild a lock from its persisted triple.
    pub fn from_record(record: &SerializedLock) -> Result<Self, ExecError> {
        let kind = record
            .lock_kind()
            .map_err(|e| ExecError::invariant(format!("{} for jig {}", e, record.origin)))?;
        let bad_data = || {
            ExecError::invariant(format!(
                "{} lock of jig {} has {} data bytes",
                kind,
                record.origin,
                record.data.len()
            ))
        };
        match kind {
            LockKind::Address => {
                if record.data.len() != ADDRESS_SIZE {
                    return Err(bad_data());
                }
                let addr = Address::from_bytes(&record.data).map_err(|_| bad_data())?;
                Ok(Lock::Address(addr))
            }
            LockKind::Jig => {
                if record.data.len() != POINTER_SIZE {
                    return Err(bad_data());
                }
                let parent = Pointer::from_bytes(&record.data).map_err(|_| bad_data())?;
                Ok(Lock::Jig(parent))
            }
            LockKind::None | LockKind::Public | LockKind::Frozen if !record.data.is_empty() => {
                Err(bad_data())
            }
            LockKind::None => Ok(Lock::None),
            LockKind::Public => Ok(Lock::Public),
            LockKind::Frozen => Ok(Lock::Frozen),
        }
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lock::Address(addr) => write!(f, "address({})", addr),
            Lock::Jig(parent) => write!(f, "jig({})", parent),
            other => write!(f, "{}", other.kind_name()),
        }
    }
}
