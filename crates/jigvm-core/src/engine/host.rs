//! Host functions imported by guest modules.
//!
//! All imports live in the [`HOST_MODULE`] namespace and use only i32/i64
//! words. Jig references are passed as the address of a jig object or proxy
//! record; strings and argument blobs as `[u32 len][bytes]` buffers.
//!
//! | Import               | Signature                         |
//! |----------------------|-----------------------------------|
//! | `constructor_local`  | `(class_idx, args) -> jig`        |
//! | `constructor_remote` | `(import_idx, args) -> jig`       |
//! | `call_method`        | `(jig, method_idx, args) -> i64`  |
//! | `call_function`      | `(import_idx, args) -> i64`       |
//! | `get_prop`           | `(jig, field_idx) -> i64`         |
//! | `jig_lock`           | `(jig, kind, data)`               |
//! | `jig_authcheck`      | `(jig, check) -> i32`             |
//! | `caller_origin`      | `() -> jig or 0`                  |
//! | `abort`              | `(message)`                       |
//! | `debug_str`          | `(message)`                       |
//!
//! Methods and fields are addressed by their ABI index in the jig's class.
//! Imports resolve to export indices once, when an instance is created.
//!
//! Errors raised here travel back through the guest as wasm traps and come
//! out of the outermost call unchanged.

use anyhow::Result;
use jigvm_types::{Address, Pointer};
use tracing::debug;
use wasmtime::{AsContextMut, Caller, Engine, Linker};

use super::calls;
use super::jigs;
use super::{check_jig_args, Cx, TxState};
use crate::abi::{Callable, FieldLayout, ImportKind, JigTy, Ty};
use crate::errors::ExecError;
use crate::instance::ModuleInstance;
use crate::locks::{AuthContext, CallerId, Lock};
use crate::marshal::{alloc_value, lower_word, read_args, read_jig_origin, read_pointee, read_value, Value};

/// Import module name guests link against.
pub const HOST_MODULE: &str = "vm";

/// `jig_lock` kinds.
const LOCK_NONE: u32 = 0;
const LOCK_ADDRESS: u32 = 1;
const LOCK_JIG: u32 = 2;
const LOCK_PUBLIC: u32 = 3;
const LOCK_FROZEN: u32 = 4;

/// `jig_authcheck` checks.
const CHECK_CALL: u32 = 0;
const CHECK_LOCK: u32 = 1;

/// Build the linker holding every host import.
pub fn build_linker(engine: &Engine) -> Result<Linker<TxState>> {
    let mut linker = Linker::new(engine);
    linker.func_wrap(HOST_MODULE, "constructor_local", constructor_local)?;
    linker.func_wrap(HOST_MODULE, "constructor_remote", constructor_remote)?;
    linker.func_wrap(HOST_MODULE, "call_method", call_method)?;
    linker.func_wrap(HOST_MODULE, "call_function", call_function)?;
    linker.func_wrap(HOST_MODULE, "get_prop", get_prop)?;
    linker.func_wrap(HOST_MODULE, "jig_lock", jig_lock)?;
    linker.func_wrap(HOST_MODULE, "jig_authcheck", jig_authcheck)?;
    linker.func_wrap(HOST_MODULE, "caller_origin", caller_origin)?;
    linker.func_wrap(HOST_MODULE, "abort", abort)?;
    linker.func_wrap(HOST_MODULE, "debug_str", debug_str)?;
    Ok(linker)
}

// =============================================================================
// Helpers
// =============================================================================

/// Instance whose code made the host call.
fn calling_instance(state: &TxState) -> Result<(usize, ModuleInstance)> {
    let frame = state
        .frames
        .last()
        .ok_or_else(|| ExecError::invariant("host call outside of a guest frame"))?;
    Ok((frame.instance, state.instances[frame.instance].clone()))
}

fn guest_string(cx: &mut Cx<'_>, inst: &ModuleInstance, ptr: u32) -> Result<String> {
    let mem = inst.memory(cx.as_context_mut());
    match read_pointee(&mem, &Ty::String, ptr)? {
        Value::String(s) => Ok(s),
        other => Err(ExecError::execution(format!("expected a string, got {:?}", other)).into()),
    }
}

fn guest_jig(cx: &mut Cx<'_>, inst: &ModuleInstance, ptr: u32) -> Result<Pointer> {
    let mem = inst.memory(cx.as_context_mut());
    read_jig_origin(&mem, ptr)
        .map_err(|e| ExecError::execution(format!("bad jig reference: {:#}", e)).into())
}

fn guest_args(
    cx: &mut Cx<'_>,
    inst: &ModuleInstance,
    params: &[FieldLayout],
    blob: u32,
) -> Result<Vec<Value>> {
    let values = {
        let mem = inst.memory(cx.as_context_mut());
        read_args(&mem, params, blob)
            .map_err(|e| ExecError::execution(format!("bad arguments: {:#}", e)))?
    };
    check_jig_args(cx.data(), params, &values)?;
    Ok(values)
}

/// Copy a call result into the caller's memory as a return word.
fn return_word(
    cx: &mut Cx<'_>,
    inst: &ModuleInstance,
    ret: Option<&Ty>,
    value: Option<Value>,
) -> Result<u64> {
    match (ret, value) {
        (Some(ty), Some(value)) => {
            let mut mem = inst.memory(cx.as_context_mut());
            lower_word(&mut mem, ty, &value)
        }
        _ => Ok(0),
    }
}

/// Resolve import `idx` of the calling package to `(instance, export index)`.
fn import_target(
    cx: &mut Cx<'_>,
    inst: &ModuleInstance,
    idx: u32,
    kind: ImportKind,
) -> Result<(usize, usize)> {
    let import = inst
        .abi()
        .import(idx as usize)
        .map_err(|e| ExecError::execution(e.to_string()))?
        .clone();
    if import.kind != kind {
        return Err(ExecError::execution(format!(
            "import {} is a {:?}, not a {:?}",
            import.name, import.kind, kind
        ))
        .into());
    }
    let export_idx = inst.import_export(idx as usize).ok_or_else(|| {
        ExecError::invariant(format!("import {} was not resolved", import.name))
    })?;
    let target = jigs::instance_for(cx, &import.pkg)?;
    Ok((target, export_idx))
}

fn proxy(cx: &mut Cx<'_>, inst: &ModuleInstance, origin: Pointer) -> Result<u32> {
    let mut mem = inst.memory(cx.as_context_mut());
    alloc_value(&mut mem, &Ty::Jig(JigTy::Any), &Value::Jig(origin))
}

// =============================================================================
// Imports
// =============================================================================

fn constructor_local(mut caller: Caller<'_, TxState>, class_idx: u32, args: u32) -> Result<u32> {
    let mut cx = caller.as_context_mut();
    let (inst_idx, inst) = calling_instance(cx.data())?;
    let abi = inst.abi().clone();
    let class = abi
        .class(class_idx as usize)
        .map_err(|e| ExecError::execution(e.to_string()))?;
    let values = guest_args(&mut cx, &inst, &class.constructor.args, args)?;
    let jig = calls::construct(&mut cx, inst_idx, class_idx as usize, values)?;
    Ok(cx.data().jigs[jig].ptr)
}

fn constructor_remote(mut caller: Caller<'_, TxState>, import_idx: u32, args: u32) -> Result<u32> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let (target, export_idx) = import_target(&mut cx, &inst, import_idx, ImportKind::Class)?;
    let abi = cx.data().instances[target].abi().clone();
    let class = abi.class(export_idx)?;
    let values = guest_args(&mut cx, &inst, &class.constructor.args, args)?;
    let jig = calls::construct(&mut cx, target, export_idx, values)?;
    let origin = cx.data().jigs[jig].origin;
    proxy(&mut cx, &inst, origin)
}

fn call_method(
    mut caller: Caller<'_, TxState>,
    jig_ref: u32,
    method_idx: u32,
    args: u32,
) -> Result<u64> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let origin = guest_jig(&mut cx, &inst, jig_ref)?;

    let jig = jigs::resolve(&mut cx, &origin)?;
    let entry = cx.data().jigs[jig];
    let abi = cx.data().instances[entry.instance].abi().clone();
    let class = abi.class(entry.export_idx)?;
    let method: &Callable = class.method(method_idx as usize).ok_or_else(|| {
        ExecError::execution(format!("{} has no method {}", class.class_ref, method_idx))
    })?;

    let values = guest_args(&mut cx, &inst, &method.args, args)?;
    let ret = calls::call_method(&mut cx, jig, method, values)?;
    return_word(&mut cx, &inst, method.ret.as_ref(), ret)
}

fn call_function(mut caller: Caller<'_, TxState>, import_idx: u32, args: u32) -> Result<u64> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let (target, export_idx) = import_target(&mut cx, &inst, import_idx, ImportKind::Function)?;
    let abi = cx.data().instances[target].abi().clone();
    let function = abi.function(export_idx)?;
    let values = guest_args(&mut cx, &inst, &function.args, args)?;
    let ret = calls::call_function(&mut cx, target, function, values)?;
    return_word(&mut cx, &inst, function.ret.as_ref(), ret)
}

fn get_prop(mut caller: Caller<'_, TxState>, jig_ref: u32, field_idx: u32) -> Result<u64> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let origin = guest_jig(&mut cx, &inst, jig_ref)?;

    let jig = jigs::resolve(&mut cx, &origin)?;
    let entry = cx.data().jigs[jig];
    let owner = cx.data().instances[entry.instance].clone();
    let abi = owner.abi().clone();
    let class = abi.class(entry.export_idx)?;
    let field = class.fields.get(field_idx as usize).ok_or_else(|| {
        ExecError::execution(format!("{} has no field {}", class.class_ref, field_idx))
    })?;
    let value = {
        let mem = owner.memory(cx.as_context_mut());
        read_value(&mem, &field.ty, entry.ptr + field.offset)?
    };
    return_word(&mut cx, &inst, Some(&field.ty), Some(value))
}

fn jig_lock(mut caller: Caller<'_, TxState>, jig_ref: u32, kind: u32, data: u32) -> Result<()> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let origin = guest_jig(&mut cx, &inst, jig_ref)?;

    let lock = match kind {
        LOCK_ADDRESS => {
            let bytes = {
                let mem = inst.memory(cx.as_context_mut());
                read_pointee(&mem, &Ty::Bytes, data)?
            };
            let Value::Bytes(bytes) = bytes else {
                return Err(ExecError::execution("address lock needs a bytes buffer").into());
            };
            let address = Address::from_bytes(&bytes)
                .map_err(|e| ExecError::execution(format!("{:#}", e)))?;
            Lock::Address(address)
        }
        LOCK_JIG => match cx.data().caller() {
            CallerId::Jig(owner) => Lock::Jig(owner),
            CallerId::Transaction => {
                return Err(ExecError::execution("jig lock requested outside of a jig").into())
            }
        },
        LOCK_PUBLIC => Lock::Public,
        LOCK_FROZEN => Lock::Frozen,
        LOCK_NONE => return Err(ExecError::not_implemented("setting a none lock").into()),
        other => return Err(ExecError::execution(format!("unknown lock kind {}", other)).into()),
    };

    let jig = jigs::resolve(&mut cx, &origin)?;
    jigs::change_lock(cx.data_mut(), jig, lock)
}

fn jig_authcheck(mut caller: Caller<'_, TxState>, jig_ref: u32, check: u32) -> Result<u32> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let origin = guest_jig(&mut cx, &inst, jig_ref)?;
    let jig = jigs::resolve(&mut cx, &origin)?;
    let entry = cx.data().jigs[jig];
    let allowed = match check {
        CHECK_CALL => entry.lock.can_receive_calls(cx.data()),
        CHECK_LOCK => entry.lock.can_be_changed(cx.data(), &origin),
        other => {
            return Err(ExecError::execution(format!("unknown auth check {}", other)).into())
        }
    };
    Ok(allowed as u32)
}

fn caller_origin(mut caller: Caller<'_, TxState>) -> Result<u32> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let frames = &cx.data().frames;
    let below = match frames.len() {
        0 | 1 => CallerId::Transaction,
        n => frames[n - 2].identity,
    };
    match below {
        CallerId::Transaction => Ok(0),
        CallerId::Jig(origin) => proxy(&mut cx, &inst, origin),
    }
}

fn abort(mut caller: Caller<'_, TxState>, message: u32) -> Result<()> {
    let mut cx = caller.as_context_mut();
    let (_, inst) = calling_instance(cx.data())?;
    let message = guest_string(&mut cx, &inst, message)
        .unwrap_or_else(|_| "<unreadable message>".to_string());
    let mut err = ExecError::execution(format!("guest aborted: {}", message));
    if let CallerId::Jig(origin) = cx.data().caller() {
        err = err.with_origin(origin);
    }
    Err(err.into())
}

fn debug_str(mut caller: Caller<'_, TxState>, message: u32) -> Result<()> {
    let mut cx = caller.as_context_mut();
    if !cx.data().env.config.log_guest_output {
        return Ok(());
    }
    let (_, inst) = calling_instance(cx.data())?;
    let message = guest_string(&mut cx, &inst, message)?;
    debug!(target: "jigvm::guest", caller = %cx.data().caller(), "{}", message);
    Ok(())
}
