//! Execution error taxonomy.
//!
//! Every failure aborts the whole transaction. The four kinds differ in who
//! is expected to act on them:
//!
//! - [`ExecError::Permission`] and [`ExecError::Execution`] are normal
//!   rejections caused by the transaction itself.
//! - [`ExecError::InvariantBroken`] means the engine or its inputs reached a
//!   state that should be impossible and needs operator attention.
//! - [`ExecError::NotImplemented`] marks a path that this build rejects on
//!   purpose.
//!
//! Engine internals return `anyhow::Result` and wrap an `ExecError` where the
//! kind matters; [`ExecError::from`] recovers it at the public boundary.

use jigvm_types::Pointer;

use crate::locks::CallerId;

/// Structured transaction failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// A lock predicate was not satisfied.
    Permission {
        message: String,
        /// Top-level instruction being executed
        instruction: Option<usize>,
        /// Jig whose lock refused the operation
        origin: Option<Pointer>,
        /// Identity that attempted the operation
        caller: Option<CallerId>,
    },

    /// Guest trap, fuel exhaustion, bad argument or failed precondition.
    Execution {
        message: String,
        instruction: Option<usize>,
        origin: Option<Pointer>,
    },

    /// Structurally impossible state (unknown lock type, jig resolved twice, ...).
    InvariantBroken {
        message: String,
        instruction: Option<usize>,
    },

    /// Intentionally unsupported lock variant or opcode path.
    NotImplemented {
        feature: String,
        instruction: Option<usize>,
    },
}

impl ExecError {
    pub fn permission(message: impl Into<String>) -> Self {
        ExecError::Permission {
            message: message.into(),
            instruction: None,
            origin: None,
            caller: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ExecError::Execution {
            message: message.into(),
            instruction: None,
            origin: None,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        ExecError::InvariantBroken {
            message: message.into(),
            instruction: None,
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        ExecError::NotImplemented {
            feature: feature.into(),
            instruction: None,
        }
    }

    /// Attach the failing instruction index unless one is already set.
    pub fn with_instruction(mut self, index: usize) -> Self {
        let slot = match &mut self {
            ExecError::Permission { instruction, .. }
            | ExecError::Execution { instruction, .. }
            | ExecError::InvariantBroken { instruction, .. }
            | ExecError::NotImplemented { instruction, .. } => instruction,
        };
        if slot.is_none() {
            *slot = Some(index);
        }
        self
    }

    pub fn with_origin(mut self, jig: Pointer) -> Self {
        match &mut self {
            ExecError::Permission { origin, .. } | ExecError::Execution { origin, .. } => {
                if origin.is_none() {
                    *origin = Some(jig);
                }
            }
            _ => {}
        }
        self
    }

    pub fn with_caller(mut self, who: CallerId) -> Self {
        if let ExecError::Permission { caller, .. } = &mut self {
            if caller.is_none() {
                *caller = Some(who);
            }
        }
        self
    }

    pub fn instruction(&self) -> Option<usize> {
        match self {
            ExecError::Permission { instruction, .. }
            | ExecError::Execution { instruction, .. }
            | ExecError::InvariantBroken { instruction, .. }
            | ExecError::NotImplemented { instruction, .. } => *instruction,
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ExecError::Permission { .. })
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, ExecError::Execution { .. })
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, ExecError::InvariantBroken { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ExecError::NotImplemented { .. })
    }

    /// Only broken invariants need a human; the rest are ordinary rejections.
    pub fn requires_operator_attention(&self) -> bool {
        self.is_invariant()
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Permission {
                message,
                instruction,
                origin,
                caller,
            } => {
                write!(f, "PermissionError: {}", message)?;
                if let Some(o) = origin {
                    write!(f, " (jig {})", o)?;
                }
                if let Some(c) = caller {
                    write!(f, " (caller {})", c)?;
                }
                if let Some(idx) = instruction {
                    write!(f, " at instruction #{}", idx)?;
                }
                Ok(())
            }
            ExecError::Execution {
                message,
                instruction,
                origin,
            } => {
                write!(f, "ExecutionError: {}", message)?;
                if let Some(o) = origin {
                    write!(f, " (jig {})", o)?;
                }
                if let Some(idx) = instruction {
                    write!(f, " at instruction #{}", idx)?;
                }
                Ok(())
            }
            ExecError::InvariantBroken {
                message,
                instruction,
            } => {
                write!(f, "InvariantBroken [operator attention]: {}", message)?;
                if let Some(idx) = instruction {
                    write!(f, " at instruction #{}", idx)?;
                }
                Ok(())
            }
            ExecError::NotImplemented {
                feature,
                instruction,
            } => {
                write!(f, "NotImplemented: {}", feature)?;
                if let Some(idx) = instruction {
                    write!(f, " at instruction #{}", idx)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ExecError {}

impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(exec) = err.downcast_ref::<ExecError>() {
            return exec.clone();
        }
        if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
            return match trap {
                wasmtime::Trap::OutOfFuel => ExecError::execution("fuel exhausted"),
                other => ExecError::execution(format!("guest trap: {}", other)),
            };
        }
        ExecError::execution(format!("{:#}", err))
    }
}
