//! JigVM
//!
//! Deterministic execution of signed transactions over jigs, contract objects
//! guarded by ownership locks and backed by sandboxed wasm modules.
//!
//! - **Types**: pointers, addresses, lock records and outputs ([`types`])
//! - **Engine**: locks, ABI, marshaling and the transaction engine ([`engine`])
//!
//! See [`engine::Vm`] for the entry point and [`runner`] for helpers that drive
//! a sequence of transactions.

#![allow(clippy::result_large_err)]

pub use jigvm_core as engine;
pub use jigvm_types as types;

pub use jigvm_core::{ExecConfig, ExecError, ExecutionResult, Instruction, Transaction, Vm};

pub mod runner {
    //! Execute-then-commit helpers.

    use anyhow::{Context, Result};
    use jigvm_core::{ExecutionResult, Transaction, Vm};
    use tracing::{info, warn};

    /// Execute `tx` and commit it when it succeeds.
    pub fn run_and_commit(vm: &Vm, tx: &Transaction) -> Result<ExecutionResult> {
        let result = vm.execute(tx).map_err(|e| {
            if e.requires_operator_attention() {
                warn!(error = %e, "transaction hit a broken invariant");
            }
            anyhow::Error::new(e)
        })?;
        vm.commit(&result).context("commit execution result")?;
        Ok(result)
    }

    /// Run transactions in order, committing each one.
    ///
    /// Stops at the first failure and reports which transaction caused it.
    pub fn replay(vm: &Vm, txs: &[Transaction]) -> Result<Vec<ExecutionResult>> {
        let mut results = Vec::with_capacity(txs.len());
        for (i, tx) in txs.iter().enumerate() {
            let result =
                run_and_commit(vm, tx).with_context(|| format!("transaction {} failed", i))?;
            results.push(result);
        }
        info!(count = results.len(), "replayed transactions");
        Ok(results)
    }
}
