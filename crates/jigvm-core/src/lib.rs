//! JigVM Core
//!
//! Transaction execution engine for jigs: contract objects whose code lives
//! in sandboxed wasm modules and whose ownership is enforced by locks.
//!
//! # Features
//!
//! - **Transactions**: ordered instructions that import packages, load and
//!   create jigs, call methods and functions, fund, lock, deploy and sign
//! - **Locks**: address, jig, public and frozen ownership checked on every
//!   call and lock change, at top level and from guest code
//! - **Marshaling**: typed values moved between guest memory and canonical
//!   bcs state records
//! - **Metering**: wasmtime fuel and memory limits per transaction
//!
//! # Core Modules
//!
//! - [`vm`]: the [`Vm`] entry point
//! - [`engine`]: per-transaction execution state and host imports
//! - [`abi`]: package ABI model and resolved lookups
//! - [`marshal`]: guest layout and state encoding of typed values
//! - [`locks`]: lock semantics
//! - [`tx`]: transaction format and hashing
//! - [`registry`] / [`state`]: collaborator traits with in-memory defaults
//!
//! # Example
//!
//! ```ignore
//! use jigvm_core::{ExecConfig, Vm};
//!
//! let vm = Vm::new(ExecConfig::default())?;
//! let pkg = vm.deploy_package(&entries, &sources)?;
//! let result = vm.execute(&tx)?;
//! vm.commit(&result)?;
//! ```

#![allow(clippy::result_large_err)]

pub mod abi;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod errors;
pub mod instance;
pub mod locks;
pub mod marshal;
pub mod memory;
pub mod registry;
pub mod state;
pub mod tx;
pub mod vm;

pub use config::ExecConfig;
pub use crypto::{Ed25519Verifier, SignatureVerifier};
pub use engine::{ExecutionResult, Statement};
pub use errors::ExecError;
pub use locks::{AuthContext, CallerId, Lock};
pub use marshal::Value;
pub use registry::{
    package_id, ArtifactCompiler, CompiledArtifacts, Compiler, InMemoryRegistry, NoopCompiler,
    Package, PackageRegistry,
};
pub use state::{MemoryStateStore, Spend, StateProvider, StateStore};
pub use tx::{Arg, Instruction, LockSpec, Opcode, Transaction};
pub use vm::Vm;
