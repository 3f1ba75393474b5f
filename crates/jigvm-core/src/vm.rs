//! # Vm: Jig Execution Entry Point
//!
//! Ties the wasmtime engine, the host linker and the collaborators together.
//!
//! ## Key Types
//!
//! - [`Vm`]: executes transactions and commits their results
//! - [`ExecutionResult`]: outputs, spends and deploys of one transaction
//!
//! ## How It Works
//!
//! 1. Register packages up front with [`Vm::deploy_package`] or in a
//!    transaction with a DEPLOY instruction
//! 2. Mint coins with [`Vm::mint_coin`] so transactions can pay for themselves
//! 3. [`Vm::execute`] runs a transaction in a fresh store and returns its result
//!    without touching state
//! 4. [`Vm::commit`] applies the result to the state store and registry
//!
//! # Example
//!
//! ```rust,ignore
//! use jigvm_core::{ArtifactCompiler, ExecConfig, Vm};
//!
//! let vm = Vm::new(ExecConfig::default().with_coin_package(coin_pkg))?
//!     .with_compiler(Arc::new(ArtifactCompiler));
//! let result = vm.execute(&tx)?;
//! vm.commit(&result)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use jigvm_types::{Address, Output, PackageId, Pointer};
use sha2::{Digest, Sha256};
use tracing::info;
use wasmtime::{Engine, Linker};

use crate::abi::Ty;
use crate::config::ExecConfig;
use crate::crypto::{Ed25519Verifier, SignatureVerifier};
use crate::engine::{self, build_linker, ExecutionResult, TxEnv, TxState};
use crate::errors::ExecError;
use crate::locks::Lock;
use crate::marshal::{encode_state, zero_value, Value};
use crate::registry::{Compiler, InMemoryRegistry, NoopCompiler, Package, PackageRegistry};
use crate::state::{MemoryStateStore, StateStore};
use crate::tx::Transaction;

/// Domain separator for minted coin origins.
const MINT_DOMAIN: &str = "jigvm-mint";

pub struct Vm {
    engine: Engine,
    linker: Arc<Linker<TxState>>,
    registry: Arc<dyn PackageRegistry>,
    state: Arc<dyn StateStore>,
    compiler: Arc<dyn Compiler>,
    verifier: Arc<dyn SignatureVerifier>,
    config: ExecConfig,
}

impl Vm {
    /// wasmtime settings an engine shared with a [`Vm`] must be built from.
    pub fn engine_config() -> wasmtime::Config {
        let mut wasm = wasmtime::Config::new();
        wasm.consume_fuel(true)
            .cranelift_nan_canonicalization(true)
            .wasm_backtrace(false);
        wasm
    }

    /// Create a VM with in-memory collaborators and deploys disabled.
    pub fn new(config: ExecConfig) -> Result<Self> {
        let engine = Engine::new(&Self::engine_config()).context("create wasm engine")?;
        Self::with_engine(config, engine)
    }

    /// Create a VM on an existing engine, built from [`Vm::engine_config`].
    ///
    /// VMs sharing an engine can share a registry without recompiling its
    /// packages.
    pub fn with_engine(config: ExecConfig, engine: Engine) -> Result<Self> {
        let linker = Arc::new(build_linker(&engine)?);
        Ok(Self {
            engine,
            linker,
            registry: Arc::new(InMemoryRegistry::new()),
            state: Arc::new(MemoryStateStore::new()),
            compiler: Arc::new(NoopCompiler),
            verifier: Arc::new(Ed25519Verifier),
            config,
        })
    }

    /// Builder method: use a custom package registry.
    pub fn with_registry(mut self, registry: Arc<dyn PackageRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Builder method: use a custom state store.
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    /// Builder method: enable deploys with a compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Builder method: use a custom signature scheme.
    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<dyn PackageRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Compile and register a package outside of any transaction.
    pub fn deploy_package(
        &self,
        entries: &[String],
        sources: &BTreeMap<String, String>,
    ) -> Result<PackageId> {
        let artifacts = self.compiler.compile(entries, sources)?;
        let pkg = Package::build(&self.engine, entries.to_vec(), sources.clone(), artifacts)?;
        let id = *pkg.id();
        self.registry.add_package(Arc::new(pkg))?;
        info!(pkg = %id.short(), "registered package");
        Ok(id)
    }

    /// Create a coin of `amount` locked to `owner`.
    ///
    /// The origin is derived from `(owner, amount, seed)`, so minting the same
    /// triple twice fails.
    pub fn mint_coin(&self, owner: Address, amount: u64, seed: u64) -> Result<Output> {
        let pkg_id = self
            .config
            .coin_package
            .ok_or_else(|| anyhow!("minting requires coin_package to be configured"))?;
        let pkg = self
            .registry
            .resolve_package(&pkg_id)?
            .ok_or_else(|| anyhow!("coin package {} is not registered", pkg_id))?;
        let class = pkg
            .abi()
            .class_by_name(&self.config.coin_class_name)
            .ok_or_else(|| {
                anyhow!("package {} has no class {}", pkg_id, self.config.coin_class_name)
            })?;
        if !class.fields.iter().any(|f| f.name == "amount" && f.ty == Ty::U64) {
            bail!("{} has no u64 amount field", class.class_ref);
        }
        let values = class
            .fields
            .iter()
            .map(|f| match f.name.as_str() {
                "amount" => Ok(Value::U64(amount)),
                _ => zero_value(&f.ty),
            })
            .collect::<Result<Vec<_>>>()?;

        let seed_bytes = bcs::to_bytes(&(MINT_DOMAIN, owner, amount, seed))?;
        let origin = Pointer::new(Sha256::digest(seed_bytes).into(), 0);
        let output = Output {
            origin,
            location: origin,
            class_ptr: Pointer::class(&pkg_id, class.export_idx as u32),
            lock: Lock::Address(owner).to_record(origin)?,
            state: encode_state(&class.field_tys(), &values)?,
        };
        self.state.insert(output.clone())?;
        info!(coin = %origin, owner = %owner, amount, "minted coin");
        Ok(output)
    }

    /// Execute `tx` without changing any state.
    pub fn execute(&self, tx: &Transaction) -> Result<ExecutionResult, ExecError> {
        let env = TxEnv {
            engine: self.engine.clone(),
            linker: self.linker.clone(),
            registry: self.registry.clone(),
            state: self.state.clone(),
            compiler: self.compiler.clone(),
            verifier: self.verifier.clone(),
            config: self.config.clone(),
        };
        engine::execute(env, tx)
    }

    /// Apply a result: consume spent outputs, add new ones and register the
    /// deployed packages.
    pub fn commit(&self, result: &ExecutionResult) -> Result<()> {
        for pkg in &result.deploys {
            if self.registry.contains(pkg.id())? {
                bail!("package {} already registered", pkg.id());
            }
        }
        self.state.apply(&result.spends, &result.outputs)?;
        for pkg in &result.deploys {
            self.registry.add_package(pkg.clone())?;
        }
        info!(
            tx = %hex::encode(result.tx_hash),
            outputs = result.outputs.len(),
            spends = result.spends.len(),
            "committed transaction"
        );
        Ok(())
    }
}
