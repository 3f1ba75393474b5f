//! Jig arena: loading, rehydration and lock changes.

use std::sync::Arc;

use anyhow::Result;
use jigvm_types::{Output, PackageId, Pointer};
use tracing::trace;
use wasmtime::AsContextMut;

use super::{Cx, TxState};
use crate::abi::{ExportKind, ImportInfo, ImportKind, JigTy};
use crate::errors::ExecError;
use crate::instance::ModuleInstance;
use crate::locks::{AuthContext, Lock};
use crate::marshal::{decode_state, write_fields, write_jig_origin};
use crate::memory::LinearMemory;
use crate::registry::Package;

/// A jig touched by the running transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JigEntry {
    pub origin: Pointer,
    /// Location it was loaded from; `None` for jigs created in this transaction.
    pub prev_location: Option<Pointer>,
    pub instance: usize,
    pub export_idx: usize,
    /// Address of the object in the instance's memory.
    pub ptr: u32,
    pub lock: Lock,
}

impl TxState {
    pub(super) fn register(&mut self, entry: JigEntry) -> usize {
        let idx = self.jigs.len();
        self.jig_by_origin.insert(entry.origin, idx);
        self.jigs.push(entry);
        idx
    }
}

/// Look a package up among this transaction's deploys, then the registry.
pub(super) fn resolve_package(state: &TxState, id: &PackageId) -> Result<Option<Arc<Package>>> {
    if let Some(pkg) = state.staged.get(id) {
        return Ok(Some(pkg.clone()));
    }
    state.env.registry.resolve_package(id)
}

/// Index of the instance running `id`, instantiating the package on first use.
pub(super) fn instance_for(cx: &mut Cx<'_>, id: &PackageId) -> Result<usize> {
    if let Some(&idx) = cx.data().instance_by_pkg.get(id) {
        return Ok(idx);
    }
    let pkg = resolve_package(cx.data(), id)?
        .ok_or_else(|| ExecError::execution(format!("unknown package {}", id)))?;
    let import_exports = pkg
        .abi()
        .imports()
        .iter()
        .map(|import| import_export(cx.data(), import))
        .collect::<Result<Vec<_>>>()?;
    let linker = cx.data().env.linker.clone();
    let instance = ModuleInstance::instantiate(&mut *cx, &linker, pkg, import_exports)?;

    let state = cx.data_mut();
    let idx = state.instances.len();
    state.instances.push(instance);
    state.instance_by_pkg.insert(*id, idx);
    Ok(idx)
}

/// Export index `import` names in its package. Interfaces have none.
fn import_export(state: &TxState, import: &ImportInfo) -> Result<Option<usize>> {
    if import.kind == ImportKind::Interface {
        return Ok(None);
    }
    let target = resolve_package(state, &import.pkg)?.ok_or_else(|| {
        ExecError::execution(format!("imported package {} is unknown", import.pkg))
    })?;
    let idx = target.abi().export_index(&import.name).ok_or_else(|| {
        ExecError::execution(format!("package {} has no export {}", import.pkg, import.name))
    })?;
    let matches = matches!(
        (import.kind, target.abi().export_kind(idx)),
        (ImportKind::Class, Some(ExportKind::Class(_)))
            | (ImportKind::Function, Some(ExportKind::Function(_)))
    );
    if !matches {
        return Err(ExecError::execution(format!(
            "export {} of package {} is not a {:?}",
            import.name, import.pkg, import.kind
        ))
        .into());
    }
    Ok(Some(idx))
}

/// LOAD: bring in the unspent output at `location`.
pub(super) fn load_by_location(cx: &mut Cx<'_>, location: &Pointer) -> Result<Pointer> {
    let output = cx
        .data()
        .env
        .state
        .output_by_location(location)?
        .ok_or_else(|| ExecError::execution(format!("no unspent output at {}", location)))?;
    if cx.data().jig_by_origin.contains_key(&output.origin) {
        return Err(ExecError::invariant(format!("jig {} resolved twice", output.origin)).into());
    }
    let origin = output.origin;
    rehydrate(cx, output)?;
    Ok(origin)
}

/// LOADBYORIGIN: bring in the latest output of `origin`.
pub(super) fn load_by_origin(cx: &mut Cx<'_>, origin: &Pointer) -> Result<Pointer> {
    if cx.data().jig_by_origin.contains_key(origin) {
        return Err(ExecError::invariant(format!("jig {} resolved twice", origin)).into());
    }
    let output = latest_output(cx.data(), origin)?;
    rehydrate(cx, output)?;
    Ok(*origin)
}

/// Arena index of `origin`, loading its latest output when not yet touched.
pub(super) fn resolve(cx: &mut Cx<'_>, origin: &Pointer) -> Result<usize> {
    if let Some(&idx) = cx.data().jig_by_origin.get(origin) {
        return Ok(idx);
    }
    let output = latest_output(cx.data(), origin)?;
    rehydrate(cx, output)
}

fn latest_output(state: &TxState, origin: &Pointer) -> Result<Output> {
    state
        .env
        .state
        .output_by_origin(origin)?
        .ok_or_else(|| ExecError::invariant(format!("jig {} does not exist", origin)).into())
}

/// Recreate a stored jig inside its package instance.
fn rehydrate(cx: &mut Cx<'_>, output: Output) -> Result<usize> {
    let origin = output.origin;
    let lock = Lock::from_record(&output.lock)?;
    if lock.is_frozen() {
        return Err(ExecError::permission("jig is frozen").with_origin(origin).into());
    }
    if output.lock.origin != origin {
        return Err(ExecError::invariant(format!("lock record of {} names another jig", origin)).into());
    }

    let pkg_id = PackageId(output.class_ptr.id);
    if resolve_package(cx.data(), &pkg_id)?.is_none() {
        return Err(ExecError::invariant(format!(
            "package {} of jig {} is not registered",
            pkg_id, origin
        ))
        .into());
    }
    let inst_idx = instance_for(cx, &pkg_id)?;
    let inst = cx.data().instances[inst_idx].clone();
    let abi = inst.abi().clone();
    let export_idx = output.class_ptr.idx as usize;
    let class = abi
        .class(export_idx)
        .map_err(|e| ExecError::invariant(format!("jig {}: {}", origin, e)))?;
    let values = decode_state(&class.field_tys(), &output.state)
        .map_err(|e| ExecError::invariant(format!("corrupt state of jig {}: {:#}", origin, e)))?;

    let ptr = {
        let mut mem = inst.memory(cx.as_context_mut());
        let ptr = mem.alloc(class.size)?;
        write_jig_origin(&mut mem, ptr, &origin)?;
        write_fields(&mut mem, &class.fields, &values, ptr)?;
        ptr
    };
    trace!(origin = %origin, class = %class.class_ref, "rehydrated jig");
    Ok(cx.data_mut().register(JigEntry {
        origin,
        prev_location: Some(output.location),
        instance: inst_idx,
        export_idx,
        ptr,
        lock,
    }))
}

/// Whether the jig `origin` is an instance of `expected`.
///
/// Jigs not yet touched are checked against their stored class without
/// loading them.
pub(super) fn conforms(state: &TxState, origin: &Pointer, expected: &JigTy) -> Result<bool> {
    if *expected == JigTy::Any {
        return Ok(true);
    }
    let (abi, export_idx) = match state.jig_by_origin.get(origin) {
        Some(&idx) => {
            let entry = state.jigs[idx];
            (state.instances[entry.instance].abi().clone(), entry.export_idx)
        }
        None => {
            let output = latest_output(state, origin)?;
            let pkg_id = PackageId(output.class_ptr.id);
            let pkg = resolve_package(state, &pkg_id)?.ok_or_else(|| {
                ExecError::invariant(format!("package {} of jig {} is not registered", pkg_id, origin))
            })?;
            (pkg.abi().clone(), output.class_ptr.idx as usize)
        }
    };
    Ok(abi.class(export_idx)?.conforms_to(expected))
}

/// Replace the lock of jig `idx` on behalf of the current caller.
pub(super) fn change_lock(state: &mut TxState, idx: usize, lock: Lock) -> Result<()> {
    let entry = state.jigs[idx];
    if !entry.lock.can_be_changed(&*state, &entry.origin) {
        return Err(ExecError::permission(format!(
            "cannot change {} lock",
            entry.lock.kind_name()
        ))
        .with_origin(entry.origin)
        .with_caller(state.caller())
        .into());
    }
    trace!(origin = %entry.origin, from = %entry.lock, to = %lock, "lock changed");
    state.jigs[idx].lock = lock;
    Ok(())
}
