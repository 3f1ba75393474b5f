//! Frames and guest calls: constructors, methods and functions.

use anyhow::Result;
use jigvm_types::Pointer;
use tracing::trace;
use wasmtime::AsContextMut;

use super::jigs::JigEntry;
use super::{Cx, Frame, TxState};
use crate::abi::{Callable, FieldLayout, Ty};
use crate::errors::ExecError;
use crate::instance::{param, ModuleInstance};
use crate::locks::{AuthContext, CallerId, Lock};
use crate::marshal::{lift_word, lower_word, write_jig_origin, Value};
use crate::memory::LinearMemory;

pub(super) fn push_frame(state: &mut TxState, frame: Frame) -> Result<()> {
    let max = state.env.config.max_call_depth;
    if state.frames.len() >= max {
        return Err(ExecError::execution(format!("call depth limit of {} exceeded", max)).into());
    }
    state.frames.push(frame);
    Ok(())
}

fn pop_frame(state: &mut TxState) -> Result<()> {
    state
        .frames
        .pop()
        .map(|_| ())
        .ok_or_else(|| ExecError::invariant("frame stack underflow").into())
}

/// Lower `values` into `inst`'s memory as call parameters.
fn lower_args(
    cx: &mut Cx<'_>,
    inst: &ModuleInstance,
    params: &[FieldLayout],
    values: &[Value],
) -> Result<Vec<(u64, bool)>> {
    let mut mem = inst.memory(cx.as_context_mut());
    params
        .iter()
        .zip(values)
        .map(|(p, v)| Ok(param(lower_word(&mut mem, &p.ty, v)?, &p.ty)))
        .collect()
}

fn lift_result(
    cx: &mut Cx<'_>,
    inst: &ModuleInstance,
    ret: Option<&Ty>,
    bits: Option<u64>,
) -> Result<Option<Value>> {
    match (ret, bits) {
        (Some(ty), Some(bits)) => {
            let mem = inst.memory(cx.as_context_mut());
            Ok(Some(lift_word(&mem, ty, bits)?))
        }
        _ => Ok(None),
    }
}

/// Run the constructor of class `export_idx` in instance `inst_idx`.
///
/// Top-level constructions take the origin of the running instruction;
/// nested ones get a fresh index. Returns the arena index of the new jig.
pub(super) fn construct(
    cx: &mut Cx<'_>,
    inst_idx: usize,
    export_idx: usize,
    args: Vec<Value>,
) -> Result<usize> {
    let inst = cx.data().instances[inst_idx].clone();
    let abi = inst.abi().clone();
    let class = abi.class(export_idx)?;

    let origin = {
        let state = cx.data_mut();
        if state.frames.is_empty() {
            Pointer::new(state.tx_hash, state.current as u32)
        } else {
            state.fresh_pointer()
        }
    };
    if cx.data().jig_by_origin.contains_key(&origin) {
        return Err(ExecError::invariant(format!("origin {} assigned twice", origin)).into());
    }

    push_frame(
        cx.data_mut(),
        Frame {
            identity: CallerId::Jig(origin),
            instance: inst_idx,
        },
    )?;
    let params = lower_args(cx, &inst, &class.constructor.args, &args)?;
    trace!(class = %class.class_ref, origin = %origin, "constructing jig");
    let ptr = inst
        .call(&mut *cx, &class.constructor.export_name, &params, true)?
        .unwrap_or(0) as u32;
    pop_frame(cx.data_mut())?;

    if ptr == 0 {
        return Err(ExecError::execution(format!(
            "constructor of {} returned null",
            class.class_ref
        ))
        .into());
    }
    {
        let mut mem = inst.memory(cx.as_context_mut());
        mem.check_range(ptr, class.size as u64)?;
        write_jig_origin(&mut mem, ptr, &origin)?;
    }
    Ok(cx.data_mut().register(JigEntry {
        origin,
        prev_location: None,
        instance: inst_idx,
        export_idx,
        ptr,
        lock: Lock::Open,
    }))
}

/// Call `method` on the jig at arena index `jig`.
pub(super) fn call_method(
    cx: &mut Cx<'_>,
    jig: usize,
    method: &Callable,
    args: Vec<Value>,
) -> Result<Option<Value>> {
    let entry = cx.data().jigs[jig];
    if !entry.lock.can_receive_calls(cx.data()) {
        return Err(ExecError::permission(format!(
            "{} lock rejects call to {}",
            entry.lock.kind_name(),
            method.name
        ))
        .with_origin(entry.origin)
        .with_caller(cx.data().caller())
        .into());
    }
    let inst = cx.data().instances[entry.instance].clone();

    push_frame(
        cx.data_mut(),
        Frame {
            identity: CallerId::Jig(entry.origin),
            instance: entry.instance,
        },
    )?;
    let mut params = vec![(entry.ptr as u64, false)];
    params.extend(lower_args(cx, &inst, &method.args, &args)?);
    trace!(origin = %entry.origin, method = %method.name, "calling method");
    let bits = inst.call(&mut *cx, &method.export_name, &params, method.ret.is_some())?;
    let ret = lift_result(cx, &inst, method.ret.as_ref(), bits)?;
    pop_frame(cx.data_mut())?;
    Ok(ret)
}

/// Call a free function. It runs with the identity of whoever called it.
pub(super) fn call_function(
    cx: &mut Cx<'_>,
    inst_idx: usize,
    function: &Callable,
    args: Vec<Value>,
) -> Result<Option<Value>> {
    let inst = cx.data().instances[inst_idx].clone();
    let identity = cx.data().caller();

    push_frame(
        cx.data_mut(),
        Frame {
            identity,
            instance: inst_idx,
        },
    )?;
    let params = lower_args(cx, &inst, &function.args, &args)?;
    trace!(function = %function.name, caller = %identity, "calling function");
    let bits = inst.call(&mut *cx, &function.export_name, &params, function.ret.is_some())?;
    let ret = lift_result(cx, &inst, function.ret.as_ref(), bits)?;
    pop_frame(cx.data_mut())?;
    Ok(ret)
}

