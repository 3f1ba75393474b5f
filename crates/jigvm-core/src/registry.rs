//! Package registry and compiler collaborators.
//!
//! A [`Package`] bundles a resolved ABI with its compiled wasm module. Package
//! ids are content hashes over `(sorted entries, sources)`, so the same
//! sources always produce the same id regardless of who deploys them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use jigvm_types::encoding::base64_decode;
use jigvm_types::PackageId;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;
use wasmtime::{Engine, Module};

use crate::abi::{Abi, AbiAccess};

/// Guest export every module must provide besides `memory`.
pub const ALLOC_EXPORT: &str = "__alloc";

/// Content-addressed package id.
///
/// Entries are sorted and sources live in a `BTreeMap`, so neither the order
/// of entry points nor the insertion order of sources changes the id.
pub fn package_id(entries: &[String], sources: &BTreeMap<String, String>) -> Result<PackageId> {
    let mut sorted = entries.to_vec();
    sorted.sort();
    let bytes = bcs::to_bytes(&(sorted, sources)).context("encode package sources")?;
    Ok(PackageId(Sha256::digest(bytes).into()))
}

// =============================================================================
// Package
// =============================================================================

/// Output of a [`Compiler`].
#[derive(Debug, Clone)]
pub struct CompiledArtifacts {
    pub abi: Abi,
    /// Wasm binary or text.
    pub wasm: Vec<u8>,
}

/// A deployed package: ABI plus compiled module.
pub struct Package {
    id: PackageId,
    abi: Arc<AbiAccess>,
    module: Module,
    entries: Vec<String>,
    sources: BTreeMap<String, String>,
    wasm: Vec<u8>,
}

impl Package {
    /// Resolve the ABI, compile the module and check the guest export contract.
    pub fn build(
        engine: &Engine,
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
        artifacts: CompiledArtifacts,
    ) -> Result<Self> {
        let id = package_id(&entries, &sources)?;
        let abi = AbiAccess::new(id, artifacts.abi)
            .with_context(|| format!("resolve abi of package {}", id.short()))?;
        let module = Module::new(engine, &artifacts.wasm)
            .with_context(|| format!("compile module of package {}", id.short()))?;

        let exports: Vec<&str> = module.exports().map(|e| e.name()).collect();
        for required in ["memory", ALLOC_EXPORT] {
            if !exports.contains(&required) {
                bail!("package {} does not export {}", id.short(), required);
            }
        }
        for class in abi.classes() {
            if !exports.contains(&class.constructor.export_name.as_str()) {
                bail!(
                    "package {} does not export {}",
                    id.short(),
                    class.constructor.export_name
                );
            }
        }

        debug!(pkg = %id.short(), classes = abi.classes().len(), "built package");
        Ok(Self {
            id,
            abi: Arc::new(abi),
            module,
            entries,
            sources,
            wasm: artifacts.wasm,
        })
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn abi(&self) -> &Arc<AbiAccess> {
        &self.abi
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Module usable in stores of `engine`.
    ///
    /// Modules are tied to the engine that compiled them; a package shared
    /// with a VM on another engine is recompiled from its wasm.
    pub fn module_for(&self, engine: &Engine) -> Result<Module> {
        if Engine::same(self.module.engine(), engine) {
            return Ok(self.module.clone());
        }
        debug!(pkg = %self.id.short(), "recompiling package for another engine");
        Module::new(engine, &self.wasm)
            .with_context(|| format!("compile module of package {}", self.id.short()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn sources(&self) -> &BTreeMap<String, String> {
        &self.sources
    }

    pub fn wasm(&self) -> &[u8] {
        &self.wasm
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("id", &self.id)
            .field("entries", &self.entries)
            .field("wasm_len", &self.wasm.len())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Lookup service for deployed packages.
pub trait PackageRegistry: Send + Sync {
    fn resolve_package(&self, id: &PackageId) -> Result<Option<Arc<Package>>>;

    /// Register a package. Registering an existing id is an error.
    fn add_package(&self, pkg: Arc<Package>) -> Result<()>;

    fn contains(&self, id: &PackageId) -> Result<bool> {
        Ok(self.resolve_package(id)?.is_some())
    }
}

/// Registry held in memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    packages: RwLock<BTreeMap<PackageId, Arc<Package>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }

    pub fn ids(&self) -> Vec<PackageId> {
        self.packages.read().keys().copied().collect()
    }
}

impl PackageRegistry for InMemoryRegistry {
    fn resolve_package(&self, id: &PackageId) -> Result<Option<Arc<Package>>> {
        Ok(self.packages.read().get(id).cloned())
    }

    fn add_package(&self, pkg: Arc<Package>) -> Result<()> {
        let mut packages = self.packages.write();
        if packages.contains_key(pkg.id()) {
            bail!("package {} already registered", pkg.id());
        }
        packages.insert(*pkg.id(), pkg);
        Ok(())
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Turns deploy sources into a module and ABI.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        entries: &[String],
        sources: &BTreeMap<String, String>,
    ) -> Result<CompiledArtifacts>;
}

/// Compiler used when in-transaction deploys are disabled.
pub struct NoopCompiler;

impl Compiler for NoopCompiler {
    fn compile(
        &self,
        _entries: &[String],
        _sources: &BTreeMap<String, String>,
    ) -> Result<CompiledArtifacts> {
        Err(anyhow!(
            "Compilation is disabled. Configure a compiler with Vm::with_compiler()."
        ))
    }
}

/// Accepts prebuilt artifacts instead of contract sources.
///
/// The single entry names a module source: `<stem>.wat` holds wasm text and
/// `<stem>.wasm` holds base64 wasm. `<stem>.abi.json` must hold its ABI.
pub struct ArtifactCompiler;

impl Compiler for ArtifactCompiler {
    fn compile(
        &self,
        entries: &[String],
        sources: &BTreeMap<String, String>,
    ) -> Result<CompiledArtifacts> {
        let [entry] = entries else {
            bail!("expected exactly one entry, got {}", entries.len());
        };
        let source = sources
            .get(entry)
            .ok_or_else(|| anyhow!("entry {} has no source", entry))?;

        let (stem, wasm) = if let Some(stem) = entry.strip_suffix(".wat") {
            (stem, source.as_bytes().to_vec())
        } else if let Some(stem) = entry.strip_suffix(".wasm") {
            (stem, base64_decode(source.trim(), "wasm module")?)
        } else {
            bail!("entry {} is neither .wat nor .wasm", entry);
        };

        let abi_name = format!("{}.abi.json", stem);
        let abi_json = sources
            .get(&abi_name)
            .ok_or_else(|| anyhow!("missing abi source {}", abi_name))?;
        Ok(CompiledArtifacts {
            abi: Abi::from_json(abi_json)?,
            wasm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_WAT: &str = r#"(module
        (memory (export "memory") 1)
        (func (export "__alloc") (param i32) (result i32) i32.const 8))"#;

    fn sources(wat: &str) -> BTreeMap<String, String> {
        let mut s = BTreeMap::new();
        s.insert("tiny.wat".to_string(), wat.to_string());
        s.insert("tiny.abi.json".to_string(), r#"{"version":1}"#.to_string());
        s
    }

    fn build(wat: &str) -> Result<Package> {
        let entries = vec!["tiny.wat".to_string()];
        let sources = sources(wat);
        let artifacts = ArtifactCompiler.compile(&entries, &sources)?;
        Package::build(&Engine::default(), entries, sources, artifacts)
    }

    #[test]
    fn test_package_id_ignores_order() {
        let a = package_id(&["x".into(), "y".into()], &sources(TINY_WAT)).unwrap();
        let b = package_id(&["y".into(), "x".into()], &sources(TINY_WAT)).unwrap();
        assert_eq!(a, b);

        let changed = package_id(&["x".into(), "y".into()], &sources(&TINY_WAT.replace('8', "9")))
            .unwrap();
        assert_ne!(a, changed);
    }

    #[test]
    fn test_build_and_register() {
        let pkg = Arc::new(build(TINY_WAT).unwrap());
        let registry = InMemoryRegistry::new();
        registry.add_package(pkg.clone()).unwrap();
        assert!(registry.contains(pkg.id()).unwrap());
        assert_eq!(registry.len(), 1);
        assert!(registry.add_package(pkg.clone()).is_err());
        assert!(registry
            .resolve_package(&PackageId([0; 32]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_alloc_export_rejected() {
        let err = build(r#"(module (memory (export "memory") 1))"#).unwrap_err();
        assert!(err.to_string().contains("__alloc"));
    }

    #[test]
    fn test_compilers_reject_bad_input() {
        assert!(NoopCompiler
            .compile(&["a.wat".into()], &BTreeMap::new())
            .is_err());
        assert!(ArtifactCompiler
            .compile(&["a.rs".into()], &sources(TINY_WAT))
            .is_err());

        let mut no_abi = sources(TINY_WAT);
        no_abi.remove("tiny.abi.json");
        assert!(ArtifactCompiler
            .compile(&["tiny.wat".into()], &no_abi)
            .is_err());
    }

    #[test]
    fn test_module_for_other_engine_recompiles() {
        let pkg = build(TINY_WAT).unwrap();
        let own = pkg.module().engine().clone();
        assert!(Engine::same(pkg.module_for(&own).unwrap().engine(), &own));

        let other = Engine::default();
        let module = pkg.module_for(&other).unwrap();
        assert!(Engine::same(module.engine(), &other));
    }
}
